use std::sync::atomic::{AtomicI64, Ordering};

/// job-scoped counter registered by a running unit of work under a string
/// key and read back after job completion
pub trait Accumulator: Send + Sync {
    fn add(&self, value: i64);
    fn get(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct LongCounter {
    value: AtomicI64,
}

impl LongCounter {
    pub fn new() -> Self {
        LongCounter {
            value: AtomicI64::new(0),
        }
    }
}

impl Accumulator for LongCounter {
    fn add(&self, value: i64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::counter::{Accumulator, LongCounter};

    #[test]
    pub fn long_counter_test() {
        let counter = LongCounter::new();
        counter.add(7);
        counter.add(-2);
        assert_eq!(counter.get(), 5);
    }
}
