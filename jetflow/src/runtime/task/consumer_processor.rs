use crate::core::element::Record;
use crate::core::runtime::TaskId;
use crate::runtime::task::{
    Consumer, IoBuffer, Processor, TaskContext, TaskProcessor, TaskProcessorState,
};

/// buffering task processor fanning output chunks to one or more consumers.
///
/// an output chunk is accepted only once every consumer reports the full
/// chunk consumed; until then the step is incomplete and re-attempted.
pub struct ConsumerTaskProcessor {
    consumers: Vec<Box<dyn Consumer>>,
    processor: Box<dyn Processor>,
    input_buffer: IoBuffer<Record>,
    output_buffer: IoBuffer<Record>,

    state: TaskProcessorState,
    producers_write_finished: bool,
    consumed_some: bool,
    /// the current output chunk was offered before and is being re-offered
    chunk_in_flight: bool,
    finalized: bool,
    finalization_finished: bool,
    finalization_started: bool,
}

impl ConsumerTaskProcessor {
    pub fn new(
        processor: Box<dyn Processor>,
        consumers: Vec<Box<dyn Consumer>>,
        chunk_size: usize,
    ) -> Self {
        ConsumerTaskProcessor {
            consumers,
            processor,
            input_buffer: IoBuffer::new(chunk_size),
            output_buffer: IoBuffer::new(chunk_size),
            state: TaskProcessorState::Open,
            producers_write_finished: false,
            consumed_some: false,
            chunk_in_flight: false,
            finalized: false,
            finalization_finished: false,
            finalization_started: false,
        }
    }

    fn check_finalization(&mut self) {
        if self.finalization_started && self.finalization_finished {
            self.finalized = true;
            self.finalization_started = false;
            self.finalization_finished = false;
            self.state = TaskProcessorState::Finalized;
            self.reset_consumers();
        }
    }

    fn consume_chunk_and_reset_output(&mut self) -> anyhow::Result<bool> {
        let fresh = !self.chunk_in_flight;
        self.chunk_in_flight = true;

        let output_buffer = std::mem::replace(&mut self.output_buffer, IoBuffer::new(0));
        let flushed = self.offer_chunk(&output_buffer, fresh)?;
        self.output_buffer = output_buffer;

        if flushed {
            self.chunk_in_flight = false;
            self.output_buffer.reset();
            self.check_finalization();
            Ok(true)
        } else {
            self.state = TaskProcessorState::Flushing;
            Ok(false)
        }
    }

    /// offer the chunk to every consumer. on a re-offer, consumers that
    /// already accepted the full chunk are skipped so nothing is delivered
    /// twice
    fn offer_chunk(&mut self, chunk: &IoBuffer<Record>, fresh: bool) -> anyhow::Result<bool> {
        if chunk.size() == 0 {
            return Ok(true);
        }
        self.consumed_some = false;
        let mut success = true;
        for consumer in self.consumers.iter_mut() {
            if !fresh && consumer.is_flushed() {
                continue;
            }
            let consumed_count = consumer.consume(chunk)?;
            success &= consumer.is_flushed();
            self.consumed_some |= consumed_count > 0;
        }
        if success {
            self.consumed_some = false;
        }
        Ok(success)
    }

    fn reset_consumers(&mut self) {
        self.consumed_some = false;
        self.chunk_in_flight = false;
        self.output_buffer.reset();
    }
}

impl TaskProcessor for ConsumerTaskProcessor {
    fn process(&mut self) -> anyhow::Result<bool> {
        if self.finalized {
            return Ok(true);
        }
        if self.output_buffer.size() > 0 {
            return self.consume_chunk_and_reset_output();
        }
        if self.finalization_started {
            self.state = TaskProcessorState::Finalizing;
            self.finalization_finished = self.processor.complete(&mut self.output_buffer)?;
        } else {
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
        }
        if self.output_buffer.size() > 0 {
            return self.consume_chunk_and_reset_output();
        }
        self.check_finalization();
        Ok(true)
    }

    fn on_chunk(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<bool> {
        self.offer_chunk(chunk, true)
    }

    fn did_work(&self) -> bool {
        self.consumed_some
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn reset(&mut self) {
        self.reset_consumers();
        self.finalization_started = false;
        self.finalization_finished = false;
        self.producers_write_finished = false;
        self.finalized = false;
        self.state = TaskProcessorState::Open;
    }

    fn on_open(&mut self, task_context: &TaskContext) -> anyhow::Result<()> {
        for consumer in self.consumers.iter_mut() {
            consumer.open();
        }
        self.reset();
        self.processor.open(task_context)
    }

    fn on_close(&mut self) {
        self.reset();
        self.processor.close();
        for consumer in self.consumers.iter_mut() {
            if !consumer.is_shuffled() {
                consumer.close();
            }
        }
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

    fn flush_stream_end(&mut self, source_task_id: TaskId) -> anyhow::Result<bool> {
        let mut delivered = true;
        for consumer in self.consumers.iter_mut() {
            delivered &= consumer.send_stream_end(source_task_id)?;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::channel::named_channel;
    use crate::core::element::Record;
    use crate::core::properties::Properties;
    use crate::core::runtime::{TaskId, VertexId};
    use crate::runtime::job::context::JobContext;
    use crate::runtime::task::consumer_processor::ConsumerTaskProcessor;
    use crate::runtime::task::shuffle::ForwardConsumer;
    use crate::runtime::task::test_support::VecSourceProcessor;
    use crate::runtime::task::{
        Consumer, IoBuffer, TaskContext, TaskProcessor, TaskProcessorState,
    };

    fn task_context() -> TaskContext {
        TaskContext::new(
            TaskId::new(VertexId(0), 0, 1),
            Arc::new(JobContext::new("consumer-processor-test", Properties::new())),
        )
    }

    /// a backpressured consumer forces partial flushes; every record must
    /// still arrive exactly once and in production order
    #[test]
    pub fn partial_flush_no_duplicates_test() {
        let records: Vec<Record> = (0..10i64).map(Record::from_i64).collect();
        // channel smaller than the chunk: flushes are always partial
        let (sender, receiver) = named_channel("narrow", 3);
        let consumer = ForwardConsumer::new(TaskId::new(VertexId(1), 0, 1), sender);

        let mut processor = ConsumerTaskProcessor::new(
            Box::new(VecSourceProcessor::new(records)),
            vec![Box::new(consumer)],
            4,
        );
        processor.on_open(&task_context()).unwrap();
        processor.on_producers_write_finished();
        processor.start_finalization();

        let mut received = Vec::new();
        for _ in 0..1000 {
            if processor.is_finalized() {
                break;
            }
            processor.process().unwrap();
            while let Ok(element) = receiver.try_recv() {
                received.push(element.into_record().as_i64());
            }
        }

        assert!(processor.is_finalized());
        assert_eq!(processor.state(), TaskProcessorState::Finalized);
        assert_eq!(received, (0..10i64).collect::<Vec<i64>>());
    }

    struct CloseTrackingConsumer {
        shuffled: bool,
        closed: Arc<AtomicBool>,
    }

    impl Consumer for CloseTrackingConsumer {
        fn open(&mut self) {}

        fn consume(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<usize> {
            Ok(chunk.size())
        }

        fn is_flushed(&self) -> bool {
            true
        }

        fn send_stream_end(&mut self, _source_task_id: TaskId) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn is_shuffled(&self) -> bool {
            self.shuffled
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// on_close closes plain consumers; shuffled consumers are left to
    /// their owning shuffle component
    #[test]
    pub fn on_close_skips_shuffled_consumers_test() {
        let plain_closed = Arc::new(AtomicBool::new(false));
        let shuffled_closed = Arc::new(AtomicBool::new(false));

        let mut processor = ConsumerTaskProcessor::new(
            Box::new(VecSourceProcessor::new(Vec::new())),
            vec![
                Box::new(CloseTrackingConsumer {
                    shuffled: false,
                    closed: plain_closed.clone(),
                }),
                Box::new(CloseTrackingConsumer {
                    shuffled: true,
                    closed: shuffled_closed.clone(),
                }),
            ],
            4,
        );
        processor.on_open(&task_context()).unwrap();
        processor.on_close();

        assert!(plain_closed.load(Ordering::SeqCst));
        assert!(!shuffled_closed.load(Ordering::SeqCst));
        assert_eq!(processor.state(), TaskProcessorState::Closed);
    }
}
