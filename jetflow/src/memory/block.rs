use crate::memory::native::NativeBuf;
use crate::memory::{ByteOrder, MemoryError, MemoryType};

#[derive(Debug)]
enum Storage {
    Heap(Vec<u8>),
    Native(NativeBuf),
}

/// fixed-size raw arena with a byte order fixed at construction.
///
/// ownership transfers to whichever component holds the block until it is
/// released back to the pool.
#[derive(Debug)]
pub struct MemoryBlock {
    storage: Storage,
    byte_order: ByteOrder,
}

macro_rules! typed_access {
    ($read_fn:ident, $write_fn:ident, $ty:ty) => {
        pub fn $read_fn(&self, offset: usize) -> Result<$ty, MemoryError> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let slice = self.slice(offset, WIDTH)?;
            let raw: [u8; WIDTH] = slice.try_into().expect("slice width checked");
            Ok(match self.byte_order {
                ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
            })
        }

        pub fn $write_fn(&mut self, offset: usize, value: $ty) -> Result<(), MemoryError> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let raw = match self.byte_order {
                ByteOrder::BigEndian => value.to_be_bytes(),
                ByteOrder::LittleEndian => value.to_le_bytes(),
            };
            let slice = self.slice_mut(offset, WIDTH)?;
            slice.copy_from_slice(&raw);
            Ok(())
        }
    };
}

impl MemoryBlock {
    pub fn heap(size: usize, byte_order: ByteOrder) -> Self {
        MemoryBlock {
            storage: Storage::Heap(vec![0u8; size]),
            byte_order,
        }
    }

    pub fn native(size: usize, byte_order: ByteOrder) -> Self {
        MemoryBlock {
            storage: Storage::Native(NativeBuf::new(size)),
            byte_order,
        }
    }

    pub fn with_type(memory_type: MemoryType, size: usize, byte_order: ByteOrder) -> Self {
        match memory_type {
            MemoryType::Heap => Self::heap(size, byte_order),
            MemoryType::Native => Self::native(size, byte_order),
        }
    }

    pub fn size(&self) -> usize {
        match &self.storage {
            Storage::Heap(v) => v.len(),
            Storage::Native(buf) => buf.len(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn memory_type(&self) -> MemoryType {
        match &self.storage {
            Storage::Heap(_) => MemoryType::Heap,
            Storage::Native(_) => MemoryType::Native,
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], MemoryError> {
        self.check_bounds(offset, len)?;
        let all = match &self.storage {
            Storage::Heap(v) => v.as_slice(),
            Storage::Native(buf) => buf.as_slice(),
        };
        Ok(&all[offset..offset + len])
    }

    fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], MemoryError> {
        self.check_bounds(offset, len)?;
        let all = match &mut self.storage {
            Storage::Heap(v) => v.as_mut_slice(),
            Storage::Native(buf) => buf.as_mut_slice(),
        };
        Ok(&mut all[offset..offset + len])
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), MemoryError> {
        let size = self.size();
        if offset.checked_add(len).map(|end| end <= size) != Some(true) {
            return Err(MemoryError::OutOfBounds { offset, len, size });
        }
        Ok(())
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), MemoryError> {
        let slice = self.slice(offset, dst.len())?;
        dst.copy_from_slice(slice);
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<(), MemoryError> {
        let slice = self.slice_mut(offset, src.len())?;
        slice.copy_from_slice(src);
        Ok(())
    }

    typed_access!(read_i32, write_i32, i32);
    typed_access!(read_i64, write_i64, i64);
    typed_access!(read_f32, write_f32, f32);
    typed_access!(read_f64, write_f64, f64);
}

#[cfg(test)]
mod tests {
    use crate::memory::{ByteOrder, MemoryBlock, MemoryError};

    #[test]
    pub fn heap_typed_access_test() {
        let mut block = MemoryBlock::heap(64, ByteOrder::BigEndian);
        block.write_i64(8, -12345).unwrap();
        assert_eq!(block.read_i64(8).unwrap(), -12345);

        // big-endian layout is observable byte for byte
        let mut raw = [0u8; 8];
        block.read_bytes(8, &mut raw).unwrap();
        assert_eq!(i64::from_be_bytes(raw), -12345);
    }

    #[test]
    pub fn native_typed_access_test() {
        let mut block = MemoryBlock::native(64, ByteOrder::LittleEndian);
        block.write_f64(0, 2.5).unwrap();
        assert_eq!(block.read_f64(0).unwrap(), 2.5);

        let mut raw = [0u8; 8];
        block.read_bytes(0, &mut raw).unwrap();
        assert_eq!(f64::from_le_bytes(raw), 2.5);
    }

    #[test]
    pub fn out_of_bounds_test() {
        let block = MemoryBlock::heap(8, ByteOrder::BigEndian);
        match block.read_i64(1) {
            Err(MemoryError::OutOfBounds { offset, len, size }) => {
                assert_eq!((offset, len, size), (1, 8, 8));
            }
            other => panic!("expected OutOfBounds, got {:?}", other),
        }
    }
}
