//! Test-and-set spinlock
//!
//! The kernel's single concurrency primitive. On a uniprocessor with
//! cooperative interrupt handlers that never call back into the allocator,
//! the heap, the ASA, or the paging layer, this lock is never contended --
//! but the acquire/release fences must still be emitted so the contract
//! holds if a hypothetical future preemption model is introduced. Waiters
//! spin; the lock never yields.

use core::sync::atomic::{AtomicBool, Ordering};

/// A compare-and-swap test-and-set lock guarding a single boolean flag.
///
/// Unlike [`spin::Mutex`], this type does not wrap a payload -- it is the
/// bare primitive named in the concurrency model, used where callers only
/// need mutual exclusion around a region of code rather than a guarded
/// value.
pub struct Spinlock {
    locked: AtomicBool,
}

impl Spinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, spinning until the test-and-set succeeds.
    pub fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Release the lock.
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Run `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.acquire();
        let r = f();
        self.release();
        r
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_round_trip() {
        let lock = Spinlock::new();
        lock.acquire();
        lock.release();
        lock.acquire();
        lock.release();
    }

    #[test]
    fn with_runs_closure_and_releases() {
        let lock = Spinlock::new();
        let result = lock.with(|| 2 + 2);
        assert_eq!(result, 4);
        // Lock must be free again -- acquiring a second time must not spin
        // forever.
        lock.acquire();
        lock.release();
    }
}
