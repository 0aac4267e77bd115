//! Placement (bump) allocator
//!
//! Phase-A of the two-phase boot sequence: before the frame bitset, the
//! paging layer, or the heap exist, early subsystems still need *somewhere*
//! to carve out memory -- most notably the frame bitset's own backing
//! storage, and the ASA bitset's backing storage. This module is a
//! monotonically increasing pointer seeded just past the kernel image.
//!
//! Memory handed out here is never freed. Once the heap installs itself as
//! the kalloc backend, the placement allocator stops being used for new
//! requests but the regions it already returned remain valid and owned by
//! their original callers for the rest of the kernel's life.

use spin::Mutex;

use crate::error::KernelError;

struct PlacementState {
    next: usize,
    limit: usize,
}

static PLACEMENT: Mutex<Option<PlacementState>> = Mutex::new(None);

/// Seed the placement allocator. `start` is typically the first byte past
/// the kernel image (and its ELF sections); `limit` bounds the region so a
/// runaway caller fails loudly instead of walking into arbitrary memory.
pub fn init(start: usize, limit: usize) {
    let mut guard = PLACEMENT.lock();
    *guard = Some(PlacementState { next: start, limit });
}

/// Bump-allocate `size` bytes aligned to `align` (must be a power of two).
/// Returns the base address of the region, or `OutOfMemory` if it would run
/// past `limit`.
pub fn alloc(size: usize, align: usize) -> Result<usize, KernelError> {
    assert!(align.is_power_of_two(), "placement alloc align must be pow2");
    let mut guard = PLACEMENT.lock();
    let state = guard.as_mut().expect("placement allocator used before init");

    let aligned = (state.next + align - 1) & !(align - 1);
    let end = aligned
        .checked_add(size)
        .ok_or(KernelError::OutOfMemory {
            requested: size,
            available: 0,
        })?;

    if end > state.limit {
        return Err(KernelError::OutOfMemory {
            requested: size,
            available: state.limit.saturating_sub(aligned),
        });
    }

    state.next = end;
    Ok(aligned)
}

/// Current bump pointer, i.e. the first byte not yet handed out. Used by the
/// frame allocator to know where its own early allocations end so it can
/// mark them reserved.
pub fn current() -> usize {
    let guard = PLACEMENT.lock();
    guard.as_ref().expect("placement allocator used before init").next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset(start: usize, limit: usize) {
        init(start, limit);
    }

    #[test]
    fn allocates_sequentially() {
        reset(0x1000, 0x10000);
        let a = alloc(16, 4).unwrap();
        let b = alloc(16, 4).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x1010);
    }

    #[test]
    fn respects_alignment() {
        reset(0x1001, 0x10000);
        let a = alloc(8, 16).unwrap();
        assert_eq!(a % 16, 0);
        assert!(a >= 0x1001);
    }

    #[test]
    fn fails_past_limit() {
        reset(0x1000, 0x1010);
        assert!(alloc(8, 4).is_ok());
        assert!(matches!(
            alloc(16, 4),
            Err(KernelError::OutOfMemory { .. })
        ));
    }
}
