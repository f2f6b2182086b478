// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{AllocError, Allocator};
use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::{slice_from_raw_parts_mut, NonNull};

/// One block of pool memory, carved linearly by a bump pointer.
/// Deallocating individual carvings is not supported; the block is either
/// reset wholesale or returned to the backing allocator.
pub(crate) struct Chunk {
    ptr: NonNull<u8>,
    layout: Layout,
    used: Cell<usize>,
    /// Size class the block belongs to on the pool free lists:
    /// `(size >> BOUNDARY_INDEX) - 1`, computed once at birth.
    index: usize,
}

impl Chunk {
    /// Requests a block of exactly `size` bytes (already rounded by the
    /// pool) from `allocator`. Over-sized allocations are used in full.
    ///
    /// The chunk does not remember the allocator; [Chunk::release] must be
    /// handed the same one.
    pub(crate) fn new_in<A: Allocator>(
        size: usize,
        index: usize,
        allocator: &A,
    ) -> Result<Self, AllocError> {
        let layout = Layout::from_size_align(size, ALIGNMENT).map_err(|_| AllocError)?;
        let allocation = allocator.allocate(layout)?;
        // SAFETY: size/align of a live allocation form a valid layout.
        let layout = unsafe {
            Layout::from_size_align(allocation.len(), ALIGNMENT).unwrap_unchecked()
        };
        Ok(Self {
            ptr: allocation.cast(),
            layout,
            used: Cell::new(0),
            index,
        })
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub(crate) fn used_bytes(&self) -> usize {
        self.used.get()
    }

    #[inline]
    pub(crate) fn free_space(&self) -> usize {
        self.size() - self.used_bytes()
    }

    /// Rewinds the bump pointer; previously carved memory must no longer be
    /// referenced by anyone.
    pub(crate) fn reset(&self) {
        self.used.set(0);
    }

    pub(crate) fn has_capacity_for(&self, layout: Layout) -> bool {
        // SAFETY: ptr + used is within the allocation or one-past-the-end.
        let offset = unsafe { self.ptr.as_ptr().add(self.used.get()) }.align_offset(layout.align());
        match offset.checked_add(layout.size()) {
            Some(needed) => needed <= self.free_space(),
            None => false,
        }
    }

    /// Bumps off the next `layout` if it fits.
    pub(crate) fn carve(&self, layout: Layout) -> Option<NonNull<[u8]>> {
        let used = self.used.get();
        // SAFETY: ptr + used is within the allocation or one-past-the-end.
        let offset = unsafe { self.ptr.as_ptr().add(used) }.align_offset(layout.align());
        let needed = offset.checked_add(layout.size())?;
        if needed > self.free_space() {
            return None;
        }
        // SAFETY: just checked that used + offset + size fits the block.
        let thin = unsafe { self.ptr.as_ptr().add(used + offset) };
        debug_assert_eq!(0, thin.align_offset(layout.align()));
        self.used.set(used + needed);
        // SAFETY: derived from the block pointer, inherently non-null.
        Some(unsafe { NonNull::new_unchecked(slice_from_raw_parts_mut(thin, layout.size())) })
    }

    /// Returns the block to `allocator`.
    ///
    /// # Safety
    /// `allocator` must be the allocator the chunk was created with, and no
    /// carved pointer may be used afterwards.
    pub(crate) unsafe fn release<A: Allocator>(self, allocator: &A) {
        allocator.deallocate(self.ptr, self.layout);
    }
}

/// Every carving is aligned at least this much; requests are rounded up to
/// this boundary before being served.
pub(crate) const ALIGNMENT: usize = 8;
