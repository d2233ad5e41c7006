use crate::core::element::Record;
use crate::core::runtime::TaskId;
use crate::runtime::task::{
    IoBuffer, Processor, TaskContext, TaskProcessor, TaskProcessorState,
};

/// task processor without buffering, for vertices with no consumers.
/// anything the unit of work emits is discarded after each step.
pub struct SimpleTaskProcessor {
    processor: Box<dyn Processor>,
    input_buffer: IoBuffer<Record>,
    output_buffer: IoBuffer<Record>,

    state: TaskProcessorState,
    finalization_started: bool,
    producers_write_finished: bool,
    finalized: bool,
}

impl SimpleTaskProcessor {
    pub fn new(processor: Box<dyn Processor>, chunk_size: usize) -> Self {
        SimpleTaskProcessor {
            processor,
            input_buffer: IoBuffer::new(chunk_size),
            output_buffer: IoBuffer::new(chunk_size),
            state: TaskProcessorState::Open,
            finalization_started: false,
            producers_write_finished: false,
            finalized: false,
        }
    }
}

impl TaskProcessor for SimpleTaskProcessor {
    fn process(&mut self) -> anyhow::Result<bool> {
        if self.finalized {
            return Ok(true);
        }
        if !self.finalization_started {
            if self.producers_write_finished && self.input_buffer.is_empty() {
                return Ok(true);
            }
            self.state = TaskProcessorState::Processing;
            let input_buffer = std::mem::replace(&mut self.input_buffer, IoBuffer::new(0));
            let consumed = self.processor.process(&input_buffer, &mut self.output_buffer);
            self.input_buffer = input_buffer;
            if consumed? {
                self.input_buffer.reset();
            }
            self.output_buffer.reset();
            Ok(true)
        } else {
            self.state = TaskProcessorState::Finalizing;
            self.finalized = self.processor.complete(&mut self.output_buffer)?;
            self.output_buffer.reset();
            if self.finalized {
                self.finalization_started = false;
                self.state = TaskProcessorState::Finalized;
            }
            Ok(true)
        }
    }

    fn on_chunk(&mut self, _chunk: &IoBuffer<Record>) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn did_work(&self) -> bool {
        false
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn reset(&mut self) {
        self.finalized = false;
        self.input_buffer.reset();
        self.output_buffer.reset();
        self.finalization_started = false;
        self.producers_write_finished = false;
        self.state = TaskProcessorState::Open;
    }

    fn on_open(&mut self, task_context: &TaskContext) -> anyhow::Result<()> {
        self.reset();
        self.processor.open(task_context)
    }

    fn on_close(&mut self) {
        self.processor.close();
        self.state = TaskProcessorState::Closed;
    }

    fn start_finalization(&mut self) {
        self.finalization_started = true;
    }

    fn on_producers_write_finished(&mut self) {
        self.producers_write_finished = true;
    }

    fn state(&self) -> TaskProcessorState {
        self.state
    }

    fn input_buffer_mut(&mut self) -> &mut IoBuffer<Record> {
        &mut self.input_buffer
    }

    fn has_pending_input(&self) -> bool {
        !self.input_buffer.is_empty()
    }

    fn flush_stream_end(&mut self, _source_task_id: TaskId) -> anyhow::Result<bool> {
        Ok(true)
    }
}
