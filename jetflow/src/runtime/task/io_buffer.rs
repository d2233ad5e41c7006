/// fixed-capacity, reusable, index-addressable buffer of records. the
/// hand-off unit between pipeline stages.
///
/// logical size and backing capacity are distinct: a consumed buffer is
/// reset, never reallocated.
#[derive(Clone, Debug)]
pub struct IoBuffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> IoBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        IoBuffer {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, item: T) -> anyhow::Result<()> {
        if self.items.len() >= self.capacity {
            return Err(anyhow!(
                "buffer full, capacity {} exceeded",
                self.capacity
            ));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn get(&self, index: usize) -> &T {
        &self.items[index]
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// logical reset. backing storage is kept for reuse
    pub fn reset(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::task::io_buffer::IoBuffer;

    #[test]
    pub fn capacity_bound_test() {
        let mut buffer = IoBuffer::new(2);
        buffer.append(1).unwrap();
        buffer.append(2).unwrap();
        assert!(buffer.is_full());
        assert!(buffer.append(3).is_err());

        assert_eq!(*buffer.get(0), 1);
        assert_eq!(buffer.size(), 2);
    }

    #[test]
    pub fn reset_keeps_capacity_test() {
        let mut buffer = IoBuffer::new(8);
        for i in 0..8 {
            buffer.append(i).unwrap();
        }
        buffer.reset();
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 8);
        buffer.append(42).unwrap();
        assert_eq!(*buffer.get(0), 42);
    }
}
