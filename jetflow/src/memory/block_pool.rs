use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;

use crate::memory::{ByteOrder, MemoryBlock, MemoryError, MemoryType};

/// backing capacity tracker shared by the block pools of one job
#[derive(Debug)]
pub struct MemoryPool {
    capacity: usize,
    reserved: AtomicUsize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        MemoryPool {
            capacity,
            reserved: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// try to reserve `size` bytes. rejection is recoverable
    pub fn reserve(&self, size: usize) -> bool {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(size) {
                Some(next) if next <= self.capacity => next,
                _ => return false,
            };
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// pool of reusable fixed-size memory blocks.
///
/// acquisition first polls the lock-free reuse queue; only on a miss is a
/// fresh reservation requested from the capacity tracker. released blocks
/// keep their reservation and go back to the queue.
pub struct MemoryBlockPool {
    block_size: usize,
    byte_order: ByteOrder,
    memory_type: MemoryType,
    memory_pool: Arc<MemoryPool>,
    segment_queue: SegQueue<MemoryBlock>,
}

impl MemoryBlockPool {
    pub fn new(
        block_size: usize,
        byte_order: ByteOrder,
        memory_type: MemoryType,
        memory_pool: Arc<MemoryPool>,
    ) -> Self {
        MemoryBlockPool {
            block_size,
            byte_order,
            memory_type,
            memory_pool,
            segment_queue: SegQueue::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn acquire(&self) -> Result<MemoryBlock, MemoryError> {
        if let Some(block) = self.segment_queue.pop() {
            return Ok(block);
        }
        if !self.memory_pool.reserve(self.block_size) {
            return Err(MemoryError::Exhausted {
                requested: self.block_size,
                available: self
                    .memory_pool
                    .capacity()
                    .saturating_sub(self.memory_pool.reserved()),
            });
        }
        Ok(MemoryBlock::with_type(
            self.memory_type,
            self.block_size,
            self.byte_order,
        ))
    }

    pub fn release(&self, block: MemoryBlock) {
        self.segment_queue.push(block);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::memory::{ByteOrder, MemoryBlockPool, MemoryError, MemoryPool, MemoryType};

    #[test]
    pub fn acquire_release_reuse_test() {
        let memory_pool = Arc::new(MemoryPool::new(4 * 1024));
        let pool = MemoryBlockPool::new(1024, ByteOrder::BigEndian, MemoryType::Heap, memory_pool);

        let block = pool.acquire().unwrap();
        assert_eq!(block.size(), 1024);
        pool.release(block);

        // reuse does not touch the capacity tracker
        let _again = pool.acquire().unwrap();
    }

    /// outstanding blocks never exceed the reserved capacity, for any
    /// acquire/release interleaving at a fixed block size
    #[test]
    pub fn capacity_bound_test() {
        let capacity_blocks = 4usize;
        let block_size = 512usize;
        let memory_pool = Arc::new(MemoryPool::new(capacity_blocks * block_size));
        let pool = MemoryBlockPool::new(
            block_size,
            ByteOrder::BigEndian,
            MemoryType::Heap,
            memory_pool,
        );

        let mut outstanding = Vec::new();
        for _ in 0..capacity_blocks {
            outstanding.push(pool.acquire().unwrap());
        }
        assert_eq!(outstanding.len(), capacity_blocks);

        match pool.acquire() {
            Err(MemoryError::Exhausted { requested, .. }) => assert_eq!(requested, block_size),
            other => panic!("expected Exhausted, got {:?}", other.map(|b| b.size())),
        }

        // releasing makes a block acquirable again, still within capacity
        pool.release(outstanding.pop().unwrap());
        let block = pool.acquire().unwrap();
        outstanding.push(block);
        assert_eq!(outstanding.len(), capacity_blocks);
        assert!(pool.acquire().is_err());
    }

    #[test]
    pub fn native_pool_test() {
        let memory_pool = Arc::new(MemoryPool::new(2048));
        let pool =
            MemoryBlockPool::new(1024, ByteOrder::LittleEndian, MemoryType::Native, memory_pool);

        let mut block = pool.acquire().unwrap();
        block.write_i32(0, 99).unwrap();
        assert_eq!(block.read_i32(0).unwrap(), 99);
        pool.release(block);
    }
}
