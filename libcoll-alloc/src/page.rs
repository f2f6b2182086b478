// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::AllocError;
use core::alloc::Layout;

/// Allocates whole pages of virtual memory for each allocation. Intended for
/// large allocations only, such as the blocks carved up by a
/// [PoolAllocator](crate::PoolAllocator).
#[derive(Clone, Copy, Debug, Default)]
pub struct PageAllocator;

/// Rounds the layout up to a whole number of pages. Fails for zero-sized
/// layouts and for alignments stricter than a page.
#[inline]
fn round_to_pages(layout: Layout) -> Result<usize, AllocError> {
    if layout.size() == 0 {
        return Err(AllocError);
    }
    let page_size = os::page_size()?;
    if layout.align() > page_size {
        return Err(AllocError);
    }
    // page_size is a power of two, so align_up is exact.
    crate::align_up(layout.size(), page_size).ok_or(AllocError)
}

#[cfg(unix)]
pub mod os {
    use super::{round_to_pages, PageAllocator};
    use allocator_api2::alloc::{AllocError, Allocator};
    use core::alloc::Layout;
    use core::ptr;

    pub fn page_size() -> Result<usize, AllocError> {
        // SAFETY: calling sysconf with correct arguments.
        let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if result <= 0 || !(result as usize).is_power_of_two() {
            return Err(AllocError);
        }
        Ok(result as usize)
    }

    unsafe impl Allocator for PageAllocator {
        fn allocate(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, AllocError> {
            // Fresh mappings are already zeroed.
            self.allocate_zeroed(layout)
        }

        fn allocate_zeroed(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, AllocError> {
            let size = round_to_pages(layout)?;
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
            // SAFETY: creates a new private anonymous mapping, akin to malloc.
            let result = unsafe { libc::mmap(ptr::null_mut(), size, prot, flags, -1, 0) };
            if result == libc::MAP_FAILED {
                return Err(AllocError);
            }
            // SAFETY: a mapping never starts at address zero unless MAP_FIXED
            // asked for it.
            let addr = unsafe { ptr::NonNull::new_unchecked(result.cast()) };
            Ok(ptr::NonNull::slice_from_raw_parts(addr, size))
        }

        unsafe fn deallocate(&self, nonnull: ptr::NonNull<u8>, layout: Layout) {
            // SAFETY: allocate would have failed for a layout this rejects.
            let size = round_to_pages(layout).unwrap_unchecked();
            // SAFETY: unmapping the mapping created in allocate.
            _ = libc::munmap(nonnull.as_ptr().cast(), size);
        }
    }
}

#[cfg(windows)]
pub mod os {
    use super::{round_to_pages, PageAllocator};
    use allocator_api2::alloc::{AllocError, Allocator};
    use core::alloc::Layout;
    use core::{mem, ptr};
    use windows_sys::Win32::System::Memory;
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub fn page_size() -> Result<usize, AllocError> {
        let mut system_info = mem::MaybeUninit::<SYSTEM_INFO>::uninit();
        // SAFETY: calling C function with correct uninit repr.
        unsafe { GetSystemInfo(system_info.as_mut_ptr()) };
        // SAFETY: GetSystemInfo is not documented to fail.
        let system_info = unsafe { system_info.assume_init() };
        let size = system_info.dwPageSize as usize;
        if size == 0 || !size.is_power_of_two() {
            return Err(AllocError);
        }
        Ok(size)
    }

    unsafe impl Allocator for PageAllocator {
        fn allocate(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, AllocError> {
            self.allocate_zeroed(layout)
        }

        fn allocate_zeroed(&self, layout: Layout) -> Result<ptr::NonNull<[u8]>, AllocError> {
            let size = round_to_pages(layout)?;
            let alloc_type = Memory::MEM_COMMIT | Memory::MEM_RESERVE;
            let protection = Memory::PAGE_READWRITE;
            // SAFETY: creates a new committed region, akin to malloc.
            let result =
                unsafe { Memory::VirtualAlloc(ptr::null_mut(), size, alloc_type, protection) };
            match ptr::NonNull::new(result.cast::<u8>()) {
                Some(addr) => Ok(ptr::NonNull::slice_from_raw_parts(addr, size)),
                None => Err(AllocError),
            }
        }

        unsafe fn deallocate(&self, nonnull: ptr::NonNull<u8>, _layout: Layout) {
            _ = Memory::VirtualFree(nonnull.as_ptr().cast(), 0, Memory::MEM_RELEASE);
        }
    }
}
