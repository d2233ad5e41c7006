//! units of work shared by the crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::counter::Accumulator;
use crate::core::element::Record;
use crate::memory::accumulator::{Accumulator as BinaryAccumulator, LongSumAccumulator};
use crate::memory::MemoryBlock;
use crate::runtime::task::{IoBuffer, Processor, TaskContext};

/// discards input, emits nothing
pub struct NoopProcessor;

impl Processor for NoopProcessor {
    fn process(
        &mut self,
        _input: &IoBuffer<Record>,
        _output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// emits a fixed set of records during finalization, bounded by the output
/// chunk capacity per call
pub struct VecSourceProcessor {
    records: Vec<Record>,
    position: usize,
    emitted: Option<Arc<AtomicUsize>>,
}

impl VecSourceProcessor {
    pub fn new(records: Vec<Record>) -> Self {
        VecSourceProcessor {
            records,
            position: 0,
            emitted: None,
        }
    }

    pub fn counted(records: Vec<Record>, emitted: Arc<AtomicUsize>) -> Self {
        VecSourceProcessor {
            records,
            position: 0,
            emitted: Some(emitted),
        }
    }
}

impl Processor for VecSourceProcessor {
    fn process(
        &mut self,
        _input: &IoBuffer<Record>,
        _output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn complete(&mut self, output: &mut IoBuffer<Record>) -> anyhow::Result<bool> {
        while self.position < self.records.len() && !output.is_full() {
            output.append(self.records[self.position].clone())?;
            self.position += 1;
            if let Some(emitted) = &self.emitted {
                emitted.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(self.position == self.records.len())
    }
}

/// copies input records to the output, resuming where the output filled up
pub struct PassThroughProcessor {
    cursor: usize,
}

impl PassThroughProcessor {
    pub fn new() -> Self {
        PassThroughProcessor { cursor: 0 }
    }
}

impl Processor for PassThroughProcessor {
    fn process(
        &mut self,
        input: &IoBuffer<Record>,
        output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool> {
        while self.cursor < input.size() && !output.is_full() {
            output.append(input.get(self.cursor).clone())?;
            self.cursor += 1;
        }
        if self.cursor == input.size() {
            self.cursor = 0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// counts every observed record into a job-scoped accumulator
pub struct CountingSinkProcessor {
    accumulator_key: String,
    accumulator: Option<Arc<dyn Accumulator>>,
}

impl CountingSinkProcessor {
    pub fn new(accumulator_key: &str) -> Self {
        CountingSinkProcessor {
            accumulator_key: accumulator_key.to_string(),
            accumulator: None,
        }
    }
}

impl Processor for CountingSinkProcessor {
    fn open(&mut self, task_context: &TaskContext) -> anyhow::Result<()> {
        self.accumulator = Some(task_context.accumulator(self.accumulator_key.as_str()));
        Ok(())
    }

    fn process(
        &mut self,
        input: &IoBuffer<Record>,
        _output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool> {
        if input.size() > 0 {
            self.accumulator
                .as_ref()
                .expect("opened")
                .add(input.size() as i64);
        }
        Ok(true)
    }
}

/// sums i64 record values in place on a pooled memory block and reports the
/// total through a job-scoped accumulator on finalization
pub struct BlockSumSinkProcessor {
    accumulator_key: String,
    accumulator: Option<Arc<dyn Accumulator>>,
    block: Option<MemoryBlock>,
    scratch: Option<MemoryBlock>,
    task_context: Option<TaskContext>,
}

impl BlockSumSinkProcessor {
    pub fn new(accumulator_key: &str) -> Self {
        BlockSumSinkProcessor {
            accumulator_key: accumulator_key.to_string(),
            accumulator: None,
            block: None,
            scratch: None,
            task_context: None,
        }
    }
}

impl Processor for BlockSumSinkProcessor {
    fn open(&mut self, task_context: &TaskContext) -> anyhow::Result<()> {
        self.accumulator = Some(task_context.accumulator(self.accumulator_key.as_str()));
        let pool = task_context.job_context().block_pool();
        self.block = Some(pool.acquire()?);
        self.scratch = Some(pool.acquire()?);
        self.task_context = Some(task_context.clone());
        Ok(())
    }

    fn process(
        &mut self,
        input: &IoBuffer<Record>,
        _output: &mut IoBuffer<Record>,
    ) -> anyhow::Result<bool> {
        let block = self.block.as_mut().expect("opened");
        let scratch = self.scratch.as_mut().expect("opened");
        for record in input.iter() {
            scratch.write_i64(0, record.as_i64())?;
            LongSumAccumulator.accept(block, 0, scratch, 0)?;
        }
        Ok(true)
    }

    fn complete(&mut self, _output: &mut IoBuffer<Record>) -> anyhow::Result<bool> {
        let block = self.block.as_ref().expect("opened");
        self.accumulator
            .as_ref()
            .expect("opened")
            .add(block.read_i64(0)?);
        Ok(true)
    }

    fn close(&mut self) {
        if let Some(task_context) = &self.task_context {
            let pool = task_context.job_context().block_pool();
            if let Some(block) = self.block.take() {
                pool.release(block);
            }
            if let Some(scratch) = self.scratch.take() {
                pool.release(scratch);
            }
        }
    }
}
