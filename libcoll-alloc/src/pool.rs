// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::chunk::{Chunk, ALIGNMENT};
use crate::{align_up, AllocError, Allocator, PageAllocator};
use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

/// Free-list slots are indexed by block size in [BOUNDARY_SIZE] multiples.
const BOUNDARY_INDEX: u32 = 12;
const BOUNDARY_SIZE: usize = 1 << BOUNDARY_INDEX;

/// Smallest block ever requested from the backing allocator.
const MIN_ALLOC: usize = 2 * BOUNDARY_SIZE;

/// Slot 0 is the sink for oversized blocks; slots 1..MAX_INDEX hold blocks
/// of size (i+1)*BOUNDARY_SIZE.
const MAX_INDEX: usize = 20;

/// [PoolAllocator] is an arena allocator: deallocating individual
/// allocations does nothing, and destructors are the caller's business.
/// Unlike a plain chain arena, a cleared pool keeps its blocks on per-size
/// free lists and serves later block requests from them, so repeated
/// fill/clear cycles stop asking the OS for memory.
///
/// Requests are rounded up to an 8-byte boundary and served from the active
/// block when it fits, from a free-listed block otherwise, and from the
/// backing allocator as a last resort.
pub struct PoolAllocator<A: Allocator = PageAllocator> {
    state: RefCell<State>,
    /// Threshold, in [BOUNDARY_SIZE] units, of free blocks retained before
    /// surplus blocks go back to the backing allocator. 0 means retain
    /// everything.
    max_free_units: Cell<usize>,
    allocator: A,
}

struct State {
    /// Blocks currently being carved; the last one is the active block.
    blocks: Vec<Chunk>,
    /// Per-size free lists. See [MAX_INDEX].
    free: [Vec<Chunk>; MAX_INDEX],
    /// Units currently held on the free lists.
    free_units: usize,
}

// NonNull inside Chunk suppresses the auto impl; the pool owns its blocks.
unsafe impl<A: Allocator + Send> Send for PoolAllocator<A> {}

impl PoolAllocator<PageAllocator> {
    /// Creates a pool drawing its blocks from whole pages of virtual
    /// memory.
    pub fn new() -> Self {
        Self::new_in(PageAllocator)
    }
}

impl Default for PoolAllocator<PageAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> PoolAllocator<A> {
    pub const fn new_in(allocator: A) -> Self {
        Self {
            state: RefCell::new(State {
                blocks: Vec::new(),
                free: [const { Vec::new() }; MAX_INDEX],
                free_units: 0,
            }),
            max_free_units: Cell::new(0),
            allocator,
        }
    }

    /// Sets the threshold at which the pool starts giving blocks back to
    /// the backing allocator, in bytes. Zero means unlimited.
    pub fn set_max_free(&self, bytes: usize) {
        let units = bytes.div_ceil(BOUNDARY_SIZE);
        self.max_free_units.set(units);
    }

    /// Bytes handed out to callers since the last clear, including padding.
    pub fn used_bytes(&self) -> usize {
        let state = self.state.borrow();
        state.blocks.iter().map(Chunk::used_bytes).sum()
    }

    /// Bytes held from the backing allocator, in-use and free-listed alike.
    pub fn reserved_bytes(&self) -> usize {
        let state = self.state.borrow();
        let active: usize = state.blocks.iter().map(Chunk::size).sum();
        let free: usize = state.free.iter().flatten().map(Chunk::size).sum();
        active + free
    }

    /// Bytes that can be served without touching the backing allocator.
    pub fn remaining_capacity(&self) -> usize {
        let state = self.state.borrow();
        let active = state.blocks.last().map_or(0, Chunk::free_space);
        let free: usize = state.free.iter().flatten().map(Chunk::size).sum();
        active + free
    }

    /// Retains the pool but recycles every block except the first: carved
    /// memory becomes invalid, blocks move to the free lists, and blocks
    /// beyond the max-free threshold return to the backing allocator.
    ///
    /// # Safety
    /// Nothing may reference memory previously carved from this pool. The
    /// containers uphold this by only clearing the pool after dropping every
    /// node allocated from it.
    pub unsafe fn clear(&self) {
        let mut state = self.state.borrow_mut();
        let mut blocks = core::mem::take(&mut state.blocks);
        if let Some(resident) = blocks.first() {
            resident.reset();
            for chunk in blocks.drain(1..) {
                Self::recycle(
                    &mut state,
                    chunk,
                    self.max_free_units.get(),
                    &self.allocator,
                );
            }
        }
        state.blocks = blocks;
    }

    fn recycle(state: &mut State, chunk: Chunk, max_free: usize, allocator: &A) {
        let units = chunk.size() >> BOUNDARY_INDEX;
        if max_free != 0 && state.free_units + units > max_free {
            // SAFETY: the chunk came from this pool's backing allocator, and
            // recycling only happens once nothing references its memory.
            unsafe { chunk.release(allocator) };
            return;
        }
        chunk.reset();
        let slot = if chunk.index() < MAX_INDEX {
            chunk.index()
        } else {
            0
        };
        state.free[slot].push(chunk);
        state.free_units += units;
    }

    /// Finds a free-listed block that can hold a request of size class
    /// `index`, preferring an exact size match.
    fn take_free(state: &mut State, index: usize) -> Option<Chunk> {
        if index < MAX_INDEX {
            for slot in index..MAX_INDEX {
                if let Some(chunk) = state.free[slot].pop() {
                    state.free_units -= chunk.size() >> BOUNDARY_INDEX;
                    return Some(chunk);
                }
            }
        }
        // The sink holds oversized blocks of assorted sizes.
        let pos = state.free[0]
            .iter()
            .position(|chunk| chunk.index() >= index)?;
        let chunk = state.free[0].swap_remove(pos);
        state.free_units -= chunk.size() >> BOUNDARY_INDEX;
        Some(chunk)
    }

    #[cold]
    #[inline(never)]
    fn grow(&self, layout: Layout) -> Result<(), AllocError> {
        // align-1 extra bytes guarantee room for alignment padding.
        let needed = layout
            .size()
            .checked_add(layout.align() - 1)
            .ok_or(AllocError)?;
        let block_size = align_up(needed, BOUNDARY_SIZE)
            .ok_or(AllocError)?
            .max(MIN_ALLOC);
        let index = (block_size >> BOUNDARY_INDEX) - 1;

        let mut state = self.state.borrow_mut();
        let chunk = match Self::take_free(&mut state, index) {
            Some(chunk) => chunk,
            None => Chunk::new_in(block_size, index, &self.allocator)?,
        };
        state.blocks.push(chunk);
        Ok(())
    }
}

unsafe impl<A: Allocator> Allocator for PoolAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError);
        }
        let size = align_up(layout.size(), ALIGNMENT).ok_or(AllocError)?;
        let layout = Layout::from_size_align(size, layout.align()).map_err(|_| AllocError)?;

        {
            let state = self.state.borrow();
            if let Some(active) = state.blocks.last() {
                if let Some(wide) = active.carve(layout) {
                    return Ok(wide);
                }
            }
        }

        self.grow(layout)?;

        let state = self.state.borrow();
        // SAFETY: grow pushed a block sized for this layout.
        let active = unsafe { state.blocks.last().unwrap_unchecked() };
        debug_assert!(active.has_capacity_for(layout));
        active.carve(layout).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // This is an arena. It does batch de-allocation on clear or drop.
    }
}

impl<A: Allocator> Drop for PoolAllocator<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for chunk in state.blocks.drain(..) {
            // SAFETY: dropping the pool ends all borrows of its memory.
            unsafe { chunk.release(&self.allocator) };
        }
        for slot in state.free.iter_mut() {
            for chunk in slot.drain(..) {
                // SAFETY: free-listed chunks have no live borrows at all.
                unsafe { chunk.release(&self.allocator) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocator_api2::alloc::Global;

    #[test]
    fn test_basics() {
        let pool = PoolAllocator::new_in(Global);
        let layout = Layout::new::<[u8; 24]>();
        let a = pool.allocate(layout).unwrap();
        let b = pool.allocate(layout).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert!(pool.used_bytes() >= 48);

        // deallocate must not panic, so the pool can back collections.
        unsafe { pool.deallocate(a.cast(), layout) };
    }

    #[test]
    fn test_rounds_requests() {
        let pool = PoolAllocator::new_in(Global);
        pool.allocate(Layout::new::<u8>()).unwrap();
        assert_eq!(ALIGNMENT, pool.used_bytes());
    }

    #[test]
    fn test_zero_sized() {
        let pool = PoolAllocator::new_in(Global);
        _ = pool.allocate(Layout::new::<()>()).unwrap_err();
    }

    #[test]
    fn test_oversized_block() {
        let pool = PoolAllocator::new_in(Global);
        let big = Layout::array::<u8>(3 * MIN_ALLOC).unwrap();
        let wide = pool.allocate(big).unwrap();
        assert!(wide.len() >= 3 * MIN_ALLOC);
    }

    #[test]
    fn test_clear_reuses_blocks() {
        let pool = PoolAllocator::new_in(Global);
        let layout = Layout::new::<[u8; 512]>();

        for _ in 0..64 {
            pool.allocate(layout).unwrap();
        }
        let reserved = pool.reserved_bytes();
        assert!(reserved >= 64 * 512);

        // Clearing and refilling must not grow what we hold from the OS.
        for _ in 0..10 {
            unsafe { pool.clear() };
            for _ in 0..64 {
                pool.allocate(layout).unwrap();
            }
            assert_eq!(reserved, pool.reserved_bytes());
        }
    }

    #[test]
    fn test_max_free_trims() {
        let pool = PoolAllocator::new_in(Global);
        pool.set_max_free(MIN_ALLOC);

        let big = Layout::array::<u8>(4 * MIN_ALLOC).unwrap();
        pool.allocate(big).unwrap();
        pool.allocate(big).unwrap();
        let reserved = pool.reserved_bytes();

        unsafe { pool.clear() };
        // Only the resident block plus at most max_free bytes stay around.
        assert!(pool.reserved_bytes() < reserved);
    }

    #[test]
    fn fuzz() {
        // Sizes stay modest so the unit-test mode finishes quickly.
        bolero::check!().with_type::<Vec<u16>>().for_each(|sizes| {
            let pool = PoolAllocator::new_in(Global);
            let mut wides = Vec::new();
            for size in sizes {
                let size = usize::from(*size);
                if size == 0 {
                    continue;
                }
                let layout = Layout::from_size_align(size, ALIGNMENT).unwrap();
                let wide = pool.allocate(layout).unwrap();
                assert!(wide.len() >= size);
                // Write the whole span to let sanitizers catch overlap.
                unsafe {
                    core::ptr::write_bytes(wide.as_ptr() as *mut u8, 0xA5, size);
                }
                wides.push(wide);
            }
            for pair in wides.windows(2) {
                assert_ne!(pair[0].as_ptr(), pair[1].as_ptr());
            }
        })
    }
}
