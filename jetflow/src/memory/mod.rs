//! off-heap memory management and in-place binary aggregation.
//!
//! blocks are fixed-size, byte-order-fixed arenas handed out by a pool and
//! returned to a lock-free reuse queue. all access is bounds-checked typed
//! read/write at a block offset; the unsafe allocation boundary is confined
//! to `native.rs`.

use thiserror::Error;

pub mod accumulator;
pub mod block;
pub mod block_pool;
mod native;

pub use block::MemoryBlock;
pub use block_pool::{MemoryBlockPool, MemoryPool};

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteOrder::BigEndian => write!(f, "BigEndian"),
            ByteOrder::LittleEndian => write!(f, "LittleEndian"),
        }
    }
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum MemoryType {
    Heap,
    Native,
}

#[derive(Error, Debug)]
pub enum MemoryError {
    /// recoverable. the caller applies backpressure and retries later
    #[error("memory capacity exhausted, requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },

    #[error("access out of bounds, offset {offset} len {len} exceeds block size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}
