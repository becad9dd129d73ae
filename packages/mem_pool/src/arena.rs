use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::slice;

use crate::{AllocError, Result};

/// The fixed-size byte buffer backing one pool.
///
/// The buffer is allocated zeroed and never resized. Pool bookkeeping only tracks offsets and
/// sizes within it; the arena itself knows nothing about regions.
///
/// The memory is obtained via [`alloc_zeroed`], which lets the platform allocator hand out
/// lazily committed pages for large arenas instead of touching every byte up front.
#[derive(Debug)]
pub(crate) struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    /// Allocates a zeroed arena of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the memory cannot be obtained.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero. Callers reject zero-sized pools before getting here.
    pub(crate) fn new(size: usize) -> Result<Self> {
        assert!(size > 0, "arena must have a non-zero size");

        let layout = Layout::array::<u8>(size)
            .map_err(|_layout_error| AllocError::OutOfMemory { requested: size })?;

        // SAFETY: The layout has a non-zero size, as asserted above.
        let ptr = unsafe { alloc_zeroed(layout) };

        let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { requested: size })?;

        Ok(Self { ptr, layout })
    }

    /// Size of the arena in bytes.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Borrows `len` bytes of the arena starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within the arena.
    #[must_use]
    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.assert_in_bounds(offset, len);

        // SAFETY: The range was bounds-checked above, the memory was initialized (zeroed) at
        // allocation time and we hold a shared reference to the arena, which owns the memory.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// Exclusively borrows `len` bytes of the arena starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within the arena.
    #[must_use]
    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.assert_in_bounds(offset, len);

        // SAFETY: The range was bounds-checked above, the memory was initialized (zeroed) at
        // allocation time and we hold an exclusive reference to the arena, which owns the memory.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }

    fn assert_in_bounds(&self, offset: usize, len: usize) {
        let end = offset
            .checked_add(len)
            .expect("a range that overflows usize cannot lie within the arena");

        assert!(
            end <= self.len(),
            "range {offset}..{end} is out of bounds of an arena of {} bytes",
            self.len()
        );
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: The pointer was returned by `alloc_zeroed` with this exact layout in `new()`
        // and is released nowhere else.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The arena exclusively owns its buffer and only hands out borrows tied to `&self` or
// `&mut self`, so moving it to another thread moves the only path to the memory along with it.
unsafe impl Send for Arena {}
