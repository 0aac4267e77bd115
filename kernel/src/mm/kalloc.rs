//! `kalloc` facade
//!
//! The interface the rest of the kernel actually calls: `kmalloc`,
//! `kmalloc_a`, `kmalloc_p`, `kmalloc_ap`, `kfree`, and the flag-bearing
//! `kalloc_malloc_real`. Underneath, the facade routes to one of two
//! backends depending on boot phase -- the [`super::placement`] bump
//! allocator before the heap exists, and [`super::heap`] once it has
//! registered itself. [`init`] performs that one-time swap; callers never
//! see the distinction.
//!
//! Allocations made through the placement backend can never be freed (see
//! [`super::placement`]); `kfree` on such an address is a silent no-op,
//! matching the source's "placement memory is never freed" model.

use bitflags::bitflags;
use spin::Mutex;

use crate::mm::{heap, paging, placement, PAGE_SIZE};

bitflags! {
    /// Allocation policy flags shared by every `kmalloc*` entry point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Failure is fatal: `kalloc_malloc_real` panics rather than
        /// returning 0.
        const CRITICAL   = 1 << 0;
        /// Failure is reported to the caller as a null (0) address.
        const GENERAL     = 1 << 1;
        /// Round the returned address up to a page boundary.
        const PAGE_ALIGN  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    /// Phase A: before the heap exists, every allocation is a permanent
    /// bump allocation.
    Placement,
    /// Phase B: the heap is live and serves every subsequent request.
    Heap,
}

static BACKEND: Mutex<Backend> = Mutex::new(Backend::Placement);

/// Swap the facade from the placement backend to the heap. Called exactly
/// once, after [`heap::init`] has run.
pub fn init() {
    *BACKEND.lock() = Backend::Heap;
}

fn current_backend() -> Backend {
    *BACKEND.lock()
}

fn backend_alloc(size: usize, align: usize) -> Option<usize> {
    match current_backend() {
        Backend::Placement => placement::alloc(size, align.max(1)).ok(),
        Backend::Heap => heap::alloc(size, align).ok(),
    }
}

/// The one real allocation routine; every `kmalloc*` helper below is a thin
/// wrapper around it. Returns the allocated virtual address, or `0` if
/// `flags` contains [`AllocFlags::GENERAL`] and the allocation failed.
///
/// # Panics
/// Panics if `flags` contains [`AllocFlags::CRITICAL`] and the allocation
/// fails -- a critical allocation that cannot be satisfied is treated as
/// unrecoverable.
pub fn kalloc_malloc_real(size: usize, phys_out: Option<&mut usize>, flags: AllocFlags) -> usize {
    let align = if flags.contains(AllocFlags::PAGE_ALIGN) {
        PAGE_SIZE
    } else {
        0
    };

    let addr = backend_alloc(size, align);

    match addr {
        Some(addr) => {
            if let Some(phys_out) = phys_out {
                *phys_out = paging::kpage_get_phys(addr & !(PAGE_SIZE - 1));
            }
            addr
        }
        None if flags.contains(AllocFlags::CRITICAL) => {
            panic!(
                "critical kalloc of {} bytes failed (backend: {:?})",
                size,
                current_backend()
            );
        }
        None => 0,
    }
}

/// Plain allocation, no alignment or physical-address requirement.
pub fn kmalloc(size: usize, flags: AllocFlags) -> usize {
    kalloc_malloc_real(size, None, flags)
}

/// Page-aligned allocation.
pub fn kmalloc_a(size: usize, flags: AllocFlags) -> usize {
    kalloc_malloc_real(size, None, flags | AllocFlags::PAGE_ALIGN)
}

/// Allocation that also reports the backing physical address.
pub fn kmalloc_p(size: usize, phys_out: &mut usize, flags: AllocFlags) -> usize {
    kalloc_malloc_real(size, Some(phys_out), flags)
}

/// Page-aligned allocation that also reports the backing physical address.
pub fn kmalloc_ap(size: usize, phys_out: &mut usize, flags: AllocFlags) -> usize {
    kalloc_malloc_real(size, Some(phys_out), flags | AllocFlags::PAGE_ALIGN)
}

/// Release a region previously returned by a `kmalloc*` call.
///
/// A no-op if `addr` was served by the placement backend (those allocations
/// live for the rest of the kernel's life) or if the heap does not
/// recognize the address.
pub fn kfree(addr: usize) {
    if current_backend() == Backend::Heap {
        let _ = heap::free(addr);
    }
}

#[cfg(all(feature = "alloc", target_os = "none"))]
mod global_alloc {
    use core::alloc::{GlobalAlloc, Layout};

    use super::{kalloc_malloc_real, kfree, AllocFlags};

    /// Routes Rust's `alloc::*` collection types (`Vec`, `Box`, `BTreeMap`,
    /// ...) through the same `kmalloc`/`kfree` facade used by C-style
    /// callers, so there is exactly one heap in the kernel.
    pub struct KernelAllocator;

    // SAFETY: `kalloc_malloc_real`/`kfree` are internally synchronized
    // (the placement allocator and the heap each hold their own lock), so
    // concurrent calls from multiple allocation sites are sound.
    unsafe impl GlobalAlloc for KernelAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let align = layout.align();
            let flags = if align > 1 {
                AllocFlags::GENERAL | AllocFlags::PAGE_ALIGN
            } else {
                AllocFlags::GENERAL
            };
            let addr = if align > 1 && align != super::PAGE_SIZE {
                // Non-power-of-page alignment: fall back to the heap's own
                // alignment inflation by requesting slightly more room.
                super::backend_alloc(layout.size() + align, align).unwrap_or(0)
            } else {
                kalloc_malloc_real(layout.size(), None, flags)
            };
            addr as *mut u8
        }

        unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
            kfree(ptr as usize);
        }
    }

    #[global_allocator]
    static ALLOCATOR: KernelAllocator = KernelAllocator;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let f = AllocFlags::GENERAL | AllocFlags::PAGE_ALIGN;
        assert!(f.contains(AllocFlags::GENERAL));
        assert!(f.contains(AllocFlags::PAGE_ALIGN));
        assert!(!f.contains(AllocFlags::CRITICAL));
    }
}
