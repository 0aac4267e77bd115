//! Synchronization primitives
//!
//! Safe global state management plus the kernel's single concurrency
//! primitive, a test-and-set spinlock.

pub mod once_lock;
pub mod spinlock;

pub use once_lock::GlobalState;
#[cfg(feature = "alloc")]
pub use once_lock::{LazyLock, OnceLock};
pub use spinlock::Spinlock;
