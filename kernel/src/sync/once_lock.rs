//! Safe global initialization
//!
//! Provides safe alternatives to `static mut` for global kernel state: a
//! `no_std` `OnceLock`/`LazyLock` pair backed by heap allocation, and a
//! `GlobalState<T>` wrapper (a `Mutex<Option<T>>`) for singletons that are
//! explicitly initialized once during boot and read thereafter -- the shape
//! used by `frame_allocator`, `asa`, `heap`, and `log_service`.

#![allow(clippy::needless_lifetimes, mismatched_lifetime_syntaxes)]

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicPtr, Ordering},
};

use spin::Mutex;

/// A cell that can be written to only once.
///
/// Similar to `std::sync::OnceLock` but works in `no_std` environments.
/// Requires the `alloc` feature (the value is boxed).
#[cfg(feature = "alloc")]
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

#[cfg(feature = "alloc")]
impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was stored by `set()` via
            // `Box::into_raw()`. The Acquire load synchronizes-with the
            // Release store in `set()`, so the pointee is fully initialized.
            Some(unsafe { &*ptr })
        }
    }

    pub fn set(&self, value: T) -> Result<(), T> {
        let boxed = alloc::boxed::Box::new(value);
        let ptr = alloc::boxed::Box::into_raw(boxed);

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: `ptr` was just produced by `Box::into_raw` above and
                // the compare_exchange failed, so no one else observed it --
                // reclaiming it here avoids a leak.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &'static T {
        if let Some(val) = self.get() {
            return val;
        }
        match self.set(f()) {
            Ok(()) => self.get().expect("OnceLock get failed after set"),
            Err(_) => self.get().expect("OnceLock get failed after concurrent init"),
        }
    }
}

#[cfg(feature = "alloc")]
// SAFETY: the inner value is heap-allocated and reached only through the
// AtomicPtr with Acquire/Release ordering; transferring ownership is safe
// when T itself is Send.
unsafe impl<T: Send> Send for OnceLock<T> {}
#[cfg(feature = "alloc")]
// SAFETY: Acquire/Release on the AtomicPtr ensures concurrent `get()` calls
// see a fully initialized T; requires T: Sync for shared access.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

#[cfg(feature = "alloc")]
impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: ptr came from `Box::into_raw` in `set()`; `&mut self`
            // guarantees no concurrent access.
            unsafe {
                let _ = alloc::boxed::Box::from_raw(ptr);
            }
        }
    }
}

/// Lazy initialization with a function, `no_std`-compatible.
#[cfg(feature = "alloc")]
pub struct LazyLock<T, F = fn() -> T> {
    cell: OnceLock<T>,
    init: UnsafeCell<Option<F>>,
}

#[cfg(feature = "alloc")]
impl<T: 'static, F: FnOnce() -> T> LazyLock<T, F> {
    pub const fn new(init: F) -> Self {
        Self {
            cell: OnceLock::new(),
            init: UnsafeCell::new(Some(init)),
        }
    }

    pub fn force(&self) -> &T {
        self.cell.get_or_init(|| {
            // SAFETY: `get_or_init` on the inner OnceLock guarantees this
            // closure runs at most once, so the take() below never races.
            let init = unsafe { &mut *self.init.get() };
            match init.take() {
                Some(f) => f(),
                None => panic!("LazyLock initialization function called twice"),
            }
        })
    }
}

#[cfg(feature = "alloc")]
impl<T: 'static, F: FnOnce() -> T> core::ops::Deref for LazyLock<T, F> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.force()
    }
}

#[cfg(feature = "alloc")]
// SAFETY: the OnceLock handles synchronization; F is consumed exactly once.
unsafe impl<T: Send, F: Send> Send for LazyLock<T, F> {}
#[cfg(feature = "alloc")]
// SAFETY: the OnceLock's CAS ensures only one thread ever runs the init
// closure, so F need only be Send, not Sync.
unsafe impl<T: Sync, F: Send> Sync for LazyLock<T, F> {}

/// Global singleton state behind a spinlock-backed mutex.
///
/// Does not require `alloc` -- the value lives inline inside the `Mutex`.
/// This is the shape used for every process-lifetime singleton named in the
/// boot order (frame bitset, paging data, ASA data, default heap).
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state. Returns `Err(value)` if already
    /// initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the inner spin::Mutex serializes all access to the Option<T>.
unsafe impl<T: Send> Send for GlobalState<T> {}
// SAFETY: the Mutex ensures no concurrent access, so T need only be Send.
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_state_init_then_read() {
        let state: GlobalState<u32> = GlobalState::new();
        assert!(!state.is_initialized());
        assert!(state.init(42).is_ok());
        assert!(state.is_initialized());
        assert_eq!(state.with(|v| *v), Some(42));
    }

    #[test]
    fn global_state_double_init_fails() {
        let state: GlobalState<u32> = GlobalState::new();
        assert!(state.init(1).is_ok());
        assert_eq!(state.init(2), Err(2));
        assert_eq!(state.with(|v| *v), Some(1));
    }

    #[test]
    fn global_state_with_mut_mutates_in_place() {
        let state: GlobalState<u32> = GlobalState::new();
        state.init(10).unwrap();
        state.with_mut(|v| *v += 5);
        assert_eq!(state.with(|v| *v), Some(15));
    }
}
