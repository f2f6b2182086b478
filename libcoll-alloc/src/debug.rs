// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{AllocError, Allocator};
use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::collections::HashMap;

/// Bytes of guard pattern written past every user region.
const RED_ZONE: usize = 8;

/// Pattern the guard bytes carry between allocation and free.
const RED_BYTE: u8 = 0xBD;

/// Pattern freed user memory is poisoned with, to make use-after-free
/// visible in dumps.
const POISON_BYTE: u8 = 0x42;

/// A checking layer over any allocator. Every allocation is padded with a
/// trailing red zone, and live pointers are tracked in a set. On free it
/// detects:
///
/// 1. freeing a pointer this allocator never handed out (or freeing twice),
/// 2. writes past the end of the user region.
///
/// [Allocator::deallocate] cannot report, so violations are counted and the
/// offending free is skipped; tests and the containers' error hooks read the
/// counters through [DebugAllocator::bad_free_count] and
/// [DebugAllocator::overflow_count].
pub struct DebugAllocator<A: Allocator> {
    inner: A,
    /// user address -> layout handed to the inner allocator.
    live: RefCell<HashMap<usize, Layout>>,
    bad_frees: Cell<usize>,
    overflows: Cell<usize>,
}

impl<A: Allocator> DebugAllocator<A> {
    pub fn new_in(inner: A) -> Self {
        Self {
            inner,
            live: RefCell::new(HashMap::new()),
            bad_frees: Cell::new(0),
            overflows: Cell::new(0),
        }
    }

    /// Number of frees whose pointer was not in the tracking set.
    pub fn bad_free_count(&self) -> usize {
        self.bad_frees.get()
    }

    /// Number of frees that found the red zone corrupted.
    pub fn overflow_count(&self) -> usize {
        self.overflows.get()
    }

    /// Number of allocations currently live.
    pub fn live_allocations(&self) -> usize {
        self.live.borrow().len()
    }

    fn padded(layout: Layout) -> Result<Layout, AllocError> {
        let size = layout.size().checked_add(RED_ZONE).ok_or(AllocError)?;
        Layout::from_size_align(size, layout.align()).map_err(|_| AllocError)
    }
}

unsafe impl<A: Allocator> Allocator for DebugAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let padded = Self::padded(layout)?;
        let wide = self.inner.allocate(padded)?;
        let user = wide.cast::<u8>();
        // SAFETY: writing the guard inside the padded allocation.
        unsafe {
            core::ptr::write_bytes(user.as_ptr().add(layout.size()), RED_BYTE, RED_ZONE);
        }
        self.live.borrow_mut().insert(user.as_ptr() as usize, padded);
        Ok(NonNull::slice_from_raw_parts(user, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let Some(padded) = self.live.borrow_mut().remove(&(ptr.as_ptr() as usize)) else {
            self.bad_frees.set(self.bad_frees.get() + 1);
            return;
        };
        let guard = core::slice::from_raw_parts(ptr.as_ptr().add(layout.size()), RED_ZONE);
        if guard.iter().any(|&b| b != RED_BYTE) {
            self.overflows.set(self.overflows.get() + 1);
        }
        core::ptr::write_bytes(ptr.as_ptr(), POISON_BYTE, layout.size());
        self.inner.deallocate(ptr, padded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocator_api2::alloc::Global;

    #[test]
    fn test_clean_roundtrip() {
        let alloc = DebugAllocator::new_in(Global);
        let layout = Layout::new::<[u8; 40]>();
        let wide = alloc.allocate(layout).unwrap();
        assert_eq!(40, wide.len());
        assert_eq!(1, alloc.live_allocations());

        unsafe { alloc.deallocate(wide.cast(), layout) };
        assert_eq!(0, alloc.live_allocations());
        assert_eq!(0, alloc.bad_free_count());
        assert_eq!(0, alloc.overflow_count());
    }

    #[test]
    fn test_unknown_pointer() {
        let alloc = DebugAllocator::new_in(Global);
        let layout = Layout::new::<u64>();
        let mut slot = 0u64;
        let bogus = NonNull::from(&mut slot).cast::<u8>();
        unsafe { alloc.deallocate(bogus, layout) };
        assert_eq!(1, alloc.bad_free_count());
    }

    #[test]
    fn test_double_free() {
        let alloc = DebugAllocator::new_in(Global);
        let layout = Layout::new::<[u8; 16]>();
        let wide = alloc.allocate(layout).unwrap();
        unsafe { alloc.deallocate(wide.cast(), layout) };
        unsafe { alloc.deallocate(wide.cast(), layout) };
        assert_eq!(1, alloc.bad_free_count());
    }

    #[test]
    fn test_overflow_detected() {
        let alloc = DebugAllocator::new_in(Global);
        let layout = Layout::new::<[u8; 16]>();
        let wide = alloc.allocate(layout).unwrap();
        // Scribble one byte past the user region.
        unsafe { *(wide.as_ptr() as *mut u8).add(16) = 0 };
        unsafe { alloc.deallocate(wide.cast(), layout) };
        assert_eq!(1, alloc.overflow_count());
        assert_eq!(0, alloc.bad_free_count());
    }
}
