//! RAII guards for kernel resources
//!
//! Thin wrappers that return a resource to its owning allocator when
//! dropped, plus a generic scope guard for everything else.

use core::ops::{Deref, DerefMut};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spin::MutexGuard;

use crate::{
    error::KernelError,
    mm::{frame_allocator, paging, paging::PageFlags},
};

/// Owns a single physical frame, freeing it back to the [`frame_allocator`]
/// on drop.
pub struct FrameGuard {
    frame_index: usize,
}

impl FrameGuard {
    /// Take ownership of an already-allocated frame.
    pub fn new(frame_index: usize) -> Self {
        Self { frame_index }
    }

    /// Allocate a frame and wrap it.
    pub fn allocate() -> Result<Self, KernelError> {
        frame_allocator::allocate().map(Self::new)
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Release ownership without freeing the frame.
    pub fn leak(self) -> usize {
        let frame_index = self.frame_index;
        core::mem::forget(self);
        frame_index
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        frame_allocator::free(self.frame_index);
    }
}

/// Owns a contiguous run of physical frames, freeing each on drop.
#[cfg(feature = "alloc")]
pub struct FramesGuard {
    frame_indices: Vec<usize>,
}

#[cfg(feature = "alloc")]
impl FramesGuard {
    pub fn new(frame_indices: Vec<usize>) -> Self {
        Self { frame_indices }
    }

    pub fn leak(self) -> Vec<usize> {
        let frame_indices = self.frame_indices.clone();
        core::mem::forget(self);
        frame_indices
    }
}

#[cfg(feature = "alloc")]
impl Drop for FramesGuard {
    fn drop(&mut self) {
        for &frame_index in &self.frame_indices {
            frame_allocator::free(frame_index);
        }
    }
}

/// Owns a single mapped virtual page, unmapping it from the window-page
/// directory on drop.
pub struct PageGuard {
    vaddr: usize,
}

impl PageGuard {
    /// Map `vaddr` and wrap it.
    pub fn map(vaddr: usize, flags: PageFlags) -> Result<Self, KernelError> {
        paging::kpage_allocate(vaddr, flags)?;
        Ok(Self { vaddr })
    }

    pub fn vaddr(&self) -> usize {
        self.vaddr
    }

    /// Release ownership without unmapping.
    pub fn leak(self) -> usize {
        let vaddr = self.vaddr;
        core::mem::forget(self);
        vaddr
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let _ = paging::kpage_free(self.vaddr);
    }
}

/// Lock guard that logs acquisition and release under a caller-supplied
/// name, useful for tracing contention on a specific global lock.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        crate::println!("[lock] acquired: {}", name);
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        crate::println!("[lock] released: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Run cleanup code when the current scope ends.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop, unless cancelled.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
