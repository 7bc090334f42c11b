use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Stack size for each spawned green thread (2 MiB).
pub const STACK_SIZE: usize = 1 << 21;

// The x86-64 call contract requires 16-byte stack alignment, so the buffer
// itself is allocated at that alignment and its top stays aligned.
const STACK_ALIGN: usize = 16;

/// Owned stack buffer for a spawned green thread.
///
/// The buffer is released when the `Stack` is dropped, which happens when the
/// garbage-collection pass discards the owning thread.
pub struct Stack {
    base: NonNull<u8>,
}

impl Stack {
    fn layout() -> Layout {
        Layout::from_size_align(STACK_SIZE, STACK_ALIGN).unwrap()
    }

    /// Allocates a fresh stack. Aborts the process if allocation fails.
    pub fn new() -> Self {
        let layout = Self::layout();
        let base = unsafe { alloc::alloc(layout) };
        match NonNull::new(base) {
            Some(base) => Self { base },
            None => alloc::handle_alloc_error(layout),
        }
    }

    /// Lowest address of the buffer.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// One past the highest address of the buffer; stacks grow down from here.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(STACK_SIZE) }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout()) }
    }
}

// The buffer is exclusively owned, so a suspended thread may be resumed from
// a different OS thread.
unsafe impl Send for Stack {}
