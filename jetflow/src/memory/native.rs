//! the only module allowed to touch raw allocation. everything it exposes is
//! bounds-safe slices over an owned native buffer.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

pub(crate) struct NativeBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl NativeBuf {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "native buffer size must be non-zero");
        let layout = Layout::array::<u8>(size).expect("illegal native buffer layout");
        // SAFETY: layout has non-zero size, checked above
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).expect("native allocation failed");
        NativeBuf { ptr, layout }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the lifetime of self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive borrow of self guarantees unique access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for NativeBuf {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout and not yet freed
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the buffer is uniquely owned, access follows Rust borrow rules
unsafe impl Send for NativeBuf {}
unsafe impl Sync for NativeBuf {}

impl std::fmt::Debug for NativeBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeBuf(len={})", self.len())
    }
}
