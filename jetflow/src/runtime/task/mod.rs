//! the chunked cooperative task protocol: units of work are driven through
//! repeated non-blocking steps, output chunks fan out to consumers, and a
//! multi-phase finalization flushes remaining buffered output.

use std::sync::Arc;

use crate::core::counter;
use crate::core::element::Record;
use crate::core::runtime::TaskId;
use crate::runtime::job::context::JobContext;

pub mod consumer_processor;
pub mod io_buffer;
pub mod shuffle;
pub mod simple_processor;
pub mod vertex_task;

#[cfg(test)]
pub mod test_support;

pub use consumer_processor::ConsumerTaskProcessor;
pub use io_buffer::IoBuffer;
pub use simple_processor::SimpleTaskProcessor;

/// per-task view of the job handed to units of work
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    job_context: Arc<JobContext>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, job_context: Arc<JobContext>) -> Self {
        TaskContext {
            task_id,
            job_context,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn job_context(&self) -> &Arc<JobContext> {
        &self.job_context
    }

    pub fn chunk_size(&self) -> usize {
        self.job_context.properties().chunk_size()
    }

    /// get or register the job-scoped counter under `key`
    pub fn accumulator(&self, key: &str) -> Arc<dyn counter::Accumulator> {
        self.job_context.accumulator(key)
    }
}

/// the unit of work running inside a task.
///
/// `process` is re-invoked with the same input chunk until it reports the
/// chunk fully consumed; `complete` is invoked repeatedly during
/// finalization, each call bounded by the output chunk capacity, until it
/// reports done.
pub trait Processor: Send {
    fn open(&mut self, _task_context: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// returns true when the input chunk has been fully consumed
    fn process(
        &mut self,
        input: &IoBuffer<Record>,
        output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool>;

    /// returns true when finalization has emitted everything
    fn complete(&mut self, _output: &mut IoBuffer<Record>) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn close(&mut self) {}
}

/// downstream sink of a task's output chunks.
///
/// consumption may be partial; the same chunk is offered again until the
/// consumer reports flushed.
pub trait Consumer: Send {
    fn open(&mut self);

    /// consume as much of the chunk as currently possible, resuming from the
    /// previous position. returns the number of records consumed by this call
    fn consume(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<usize>;

    fn is_flushed(&self) -> bool;

    /// deliver the producer's end-of-stream to every target. returns true
    /// once fully delivered
    fn send_stream_end(&mut self, source_task_id: TaskId) -> anyhow::Result<bool>;

    /// true when this consumer is fed into a shuffle edge and closed by the
    /// owning shuffle component instead of the task processor
    fn is_shuffled(&self) -> bool;

    fn close(&mut self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskProcessorState {
    Open,
    Processing,
    Flushing,
    Finalizing,
    Finalized,
    Closed,
}

/// drives one unit of work through the chunked cooperative protocol
pub trait TaskProcessor: Send {
    /// advance one non-blocking step. returns false when the step is
    /// incomplete (output flush pending) and must be re-attempted
    fn process(&mut self) -> anyhow::Result<bool>;

    /// offer a chunk to every registered consumer. returns true when all of
    /// them report the full chunk consumed
    fn on_chunk(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<bool>;

    fn did_work(&self) -> bool;

    fn is_finalized(&self) -> bool;

    fn reset(&mut self);

    fn on_open(&mut self, task_context: &TaskContext) -> anyhow::Result<()>;

    fn on_close(&mut self);

    /// switch into the finalization phase
    fn start_finalization(&mut self);

    fn on_producers_write_finished(&mut self);

    fn state(&self) -> TaskProcessorState;

    /// the chunk the owning task fills with upstream records
    fn input_buffer_mut(&mut self) -> &mut IoBuffer<Record>;

    /// input chunk offered but not yet consumed by the unit of work
    fn has_pending_input(&self) -> bool;

    /// propagate the task's end-of-stream through the consumers. returns
    /// true once every consumer delivered it
    fn flush_stream_end(&mut self, source_task_id: TaskId) -> anyhow::Result<bool>;
}

/// variant selection happens at construction: consumer-less vertices get the
/// simple processor, everything else fans out through the buffering one
pub fn new_task_processor(
    processor: Box<dyn Processor>,
    consumers: Vec<Box<dyn Consumer>>,
    chunk_size: usize,
) -> Box<dyn TaskProcessor> {
    if consumers.is_empty() {
        Box::new(SimpleTaskProcessor::new(processor, chunk_size))
    } else {
        Box::new(ConsumerTaskProcessor::new(processor, consumers, chunk_size))
    }
}
