//! stateless binary operators merging two encoded scalar values in place.
//!
//! both operands live in raw memory blocks; the result is written back into
//! the accumulated slot. each block's own byte order is honored, so the two
//! operands may use different encodings.

use crate::memory::{MemoryBlock, MemoryError};

pub trait Accumulator: Send + Sync {
    /// merge the value at `incoming` into the value at `accumulated`
    fn accept(
        &self,
        accumulated: &mut MemoryBlock,
        accumulated_offset: usize,
        incoming: &MemoryBlock,
        incoming_offset: usize,
    ) -> Result<(), MemoryError>;
}

macro_rules! accumulator {
    ($(#[$doc:meta])* $name:ident, $read_fn:ident, $write_fn:ident, $ty:ty, $apply:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, Default)]
        pub struct $name;

        impl Accumulator for $name {
            fn accept(
                &self,
                accumulated: &mut MemoryBlock,
                accumulated_offset: usize,
                incoming: &MemoryBlock,
                incoming_offset: usize,
            ) -> Result<(), MemoryError> {
                let old_value = accumulated.$read_fn(accumulated_offset)?;
                let new_value = incoming.$read_fn(incoming_offset)?;
                let apply: fn($ty, $ty) -> $ty = $apply;
                accumulated.$write_fn(accumulated_offset, apply(old_value, new_value))
            }
        }
    };
}

accumulator!(IntSumAccumulator, read_i32, write_i32, i32, |a, b| a.wrapping_add(b));
accumulator!(IntMinAccumulator, read_i32, write_i32, i32, |a, b| a.min(b));
accumulator!(IntMaxAccumulator, read_i32, write_i32, i32, |a, b| a.max(b));
accumulator!(IntAndAccumulator, read_i32, write_i32, i32, |a, b| a & b);
accumulator!(IntOrAccumulator, read_i32, write_i32, i32, |a, b| a | b);
accumulator!(IntXorAccumulator, read_i32, write_i32, i32, |a, b| a ^ b);

accumulator!(LongSumAccumulator, read_i64, write_i64, i64, |a, b| a.wrapping_add(b));
accumulator!(LongMinAccumulator, read_i64, write_i64, i64, |a, b| a.min(b));
accumulator!(LongMaxAccumulator, read_i64, write_i64, i64, |a, b| a.max(b));
accumulator!(LongAndAccumulator, read_i64, write_i64, i64, |a, b| a & b);
accumulator!(LongOrAccumulator, read_i64, write_i64, i64, |a, b| a | b);
accumulator!(LongXorAccumulator, read_i64, write_i64, i64, |a, b| a ^ b);

accumulator!(FloatSumAccumulator, read_f32, write_f32, f32, |a, b| a + b);
accumulator!(FloatMinAccumulator, read_f32, write_f32, f32, |a, b| a.min(b));
accumulator!(FloatMaxAccumulator, read_f32, write_f32, f32, |a, b| a.max(b));

accumulator!(DoubleSumAccumulator, read_f64, write_f64, f64, |a, b| a + b);
accumulator!(DoubleMinAccumulator, read_f64, write_f64, f64, |a, b| a.min(b));
accumulator!(DoubleMaxAccumulator, read_f64, write_f64, f64, |a, b| a.max(b));
