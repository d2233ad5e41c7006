use std::collections::HashSet;
use std::sync::Arc;

use crate::channel::ElementReceiver;
use crate::core::element::Element;
use crate::core::runtime::TaskId;
use crate::runtime::executor::{Progress, TickTask};
use crate::runtime::task::TaskProcessor;

pub type TaskFinishedHook = Arc<dyn Fn(TaskId) + Send + Sync>;

/// drives one task through the protocol: fills the processor's input chunk
/// from the task's channel, tracks per-producer end-of-stream, triggers
/// finalization once upstream production is done, and flushes the task's own
/// end-of-stream before reporting completion.
pub struct VertexTask {
    task_id: TaskId,
    vertex_name: String,
    task_processor: Box<dyn TaskProcessor>,
    input_receiver: ElementReceiver,
    upstream_count: usize,

    stream_ends_seen: HashSet<TaskId>,
    producers_finished_signaled: bool,
    finalization_triggered: bool,
    stream_end_flushed: bool,
    done: bool,

    on_finished: TaskFinishedHook,
}

impl VertexTask {
    pub fn new(
        task_id: TaskId,
        vertex_name: &str,
        task_processor: Box<dyn TaskProcessor>,
        input_receiver: ElementReceiver,
        upstream_count: usize,
        on_finished: TaskFinishedHook,
    ) -> Self {
        VertexTask {
            task_id,
            vertex_name: vertex_name.to_string(),
            task_processor,
            input_receiver,
            upstream_count,
            stream_ends_seen: HashSet::new(),
            producers_finished_signaled: false,
            finalization_triggered: false,
            stream_end_flushed: false,
            done: false,
            on_finished,
        }
    }

    fn drain_input(&mut self) -> anyhow::Result<usize> {
        let mut pulled = 0usize;
        let input = self.task_processor.input_buffer_mut();
        while !input.is_full() {
            match self.input_receiver.try_recv() {
                Ok(Element::Record(record)) => {
                    input.append(record)?;
                    pulled += 1;
                }
                Ok(Element::StreamEnd(stream_end)) => {
                    self.stream_ends_seen.insert(stream_end.source_task_id);
                }
                Err(_) => break,
            }
        }

        if !self.producers_finished_signaled
            && self.stream_ends_seen.len() >= self.upstream_count
        {
            debug!(
                "task {} saw end-of-stream from all {} producers",
                self.task_id, self.upstream_count
            );
            self.task_processor.on_producers_write_finished();
            self.producers_finished_signaled = true;
        }
        Ok(pulled)
    }
}

impl Drop for VertexTask {
    fn drop(&mut self) {
        self.task_processor.on_close();
    }
}

impl TickTask for VertexTask {
    fn name(&self) -> String {
        format!("{}[{}]", self.vertex_name, self.task_id)
    }

    fn tick(&mut self) -> anyhow::Result<Progress> {
        if self.done {
            return Ok(Progress::Done);
        }

        // a task with no producers finalizes from the start: the unit of
        // work emits everything through bounded complete() calls
        if self.upstream_count == 0 && !self.producers_finished_signaled {
            self.task_processor.on_producers_write_finished();
            self.task_processor.start_finalization();
            self.producers_finished_signaled = true;
            self.finalization_triggered = true;
        }

        let mut pulled = 0;
        if !self.finalization_triggered && !self.task_processor.has_pending_input() {
            pulled = self.drain_input()?;
        }

        let step_complete = self.task_processor.process()?;

        // finalization only after every prior production step was accepted:
        // all producers finished, input drained, no flush pending
        if step_complete
            && self.producers_finished_signaled
            && !self.finalization_triggered
            && !self.task_processor.has_pending_input()
        {
            self.task_processor.start_finalization();
            self.finalization_triggered = true;
        }

        if self.task_processor.is_finalized() {
            if !self.stream_end_flushed {
                self.stream_end_flushed = self.task_processor.flush_stream_end(self.task_id)?;
            }
            if self.stream_end_flushed {
                info!("task {} finalized", self.name());
                self.done = true;
                (self.on_finished)(self.task_id);
                return Ok(Progress::Done);
            }
        }

        if pulled > 0 || !step_complete || self.task_processor.did_work() {
            Ok(Progress::DidWork)
        } else {
            Ok(Progress::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::channel::named_channel;
    use crate::core::element::{Element, Record};
    use crate::core::properties::Properties;
    use crate::core::runtime::{TaskId, VertexId};
    use crate::runtime::executor::{Progress, TickTask};
    use crate::runtime::job::context::JobContext;
    use crate::runtime::task::test_support::{CountingSinkProcessor, VecSourceProcessor};
    use crate::runtime::task::vertex_task::VertexTask;
    use crate::runtime::task::{new_task_processor, TaskContext};

    fn tick_until_done(task: &mut VertexTask, max_ticks: usize) {
        for _ in 0..max_ticks {
            match task.tick().unwrap() {
                Progress::Done => return,
                _ => {}
            }
        }
        panic!("task did not finish within {} ticks", max_ticks);
    }

    #[test]
    pub fn sink_task_counts_and_finishes_test() {
        let job_context = Arc::new(JobContext::new("sink-task-test", Properties::new()));
        let task_id = TaskId::new(VertexId(1), 0, 1);
        let task_context = TaskContext::new(task_id, job_context.clone());

        let mut processor = new_task_processor(
            Box::new(CountingSinkProcessor::new("records")),
            Vec::new(),
            16,
        );
        processor.on_open(&task_context).unwrap();

        let (sender, receiver) = named_channel("input", 1024);
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = finished.clone();
        let mut task = VertexTask::new(
            task_id,
            "sink",
            processor,
            receiver,
            1,
            Arc::new(move |_| {
                finished_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for i in 0..100i64 {
            sender.try_send(Element::new_record(Record::from_i64(i))).unwrap();
        }
        let producer = TaskId::new(VertexId(0), 0, 1);
        sender.try_send(Element::new_stream_end(producer)).unwrap();

        tick_until_done(&mut task, 1000);

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(job_context.accumulator("records").get(), 100);
    }

    /// finalization is idempotent after completion: further ticks stay Done
    /// and do not re-invoke the unit of work
    #[test]
    pub fn post_completion_idempotence_test() {
        let job_context = Arc::new(JobContext::new("idempotence-test", Properties::new()));
        let task_id = TaskId::new(VertexId(0), 0, 1);
        let task_context = TaskContext::new(task_id, job_context);

        let emitted = Arc::new(AtomicUsize::new(0));
        let mut processor = new_task_processor(
            Box::new(VecSourceProcessor::counted(
                (0..10i64).map(Record::from_i64).collect(),
                emitted.clone(),
            )),
            Vec::new(),
            4,
        );
        processor.on_open(&task_context).unwrap();

        let (_sender, receiver) = named_channel("input", 4);
        let mut task = VertexTask::new(
            task_id,
            "source",
            processor,
            receiver,
            0,
            Arc::new(|_| {}),
        );

        tick_until_done(&mut task, 1000);
        let emitted_at_completion = emitted.load(Ordering::SeqCst);
        assert_eq!(emitted_at_completion, 10);

        for _ in 0..10 {
            assert_eq!(task.tick().unwrap(), Progress::Done);
        }
        assert_eq!(emitted.load(Ordering::SeqCst), emitted_at_completion);
    }
}
