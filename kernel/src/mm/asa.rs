//! Kernel address-space allocator (ASA)
//!
//! Hands out ranges of free kernel *virtual* addresses, one bit per page
//! over `[0, KVIRT_MAX)`. It knows nothing about physical frames or page
//! tables -- callers pair an ASA allocation with [`super::paging`] calls to
//! actually back the returned range with memory. Allocation is linear
//! first-fit over contiguous clear bits; freed runs are never coalesced
//! into anything beyond what the bitset already represents, since clearing
//! bits is itself the only bookkeeping this layer does.

use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{bitset::Bitset, KVIRT_MAX, KVIRT_RESERVED},
    sync::GlobalState,
};

struct AsaState {
    bitset: Bitset<'static>,
    page_size: usize,
}

impl AsaState {
    fn find_run(&self, n_pages: usize) -> Option<usize> {
        if n_pages == 0 || n_pages > self.bitset.len() {
            return None;
        }
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for i in 0..self.bitset.len() {
            if self.bitset.test(i) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == n_pages {
                return Some(run_start);
            }
        }
        None
    }

    fn alloc(&mut self, n_pages: usize) -> usize {
        match self.find_run(n_pages) {
            Some(start) => {
                for i in start..start + n_pages {
                    self.bitset.set(i);
                }
                start * self.page_size
            }
            None => 0,
        }
    }

    fn free(&mut self, vaddr: usize, n_pages: usize) {
        let start = vaddr / self.page_size;
        for i in start..start + n_pages {
            self.bitset.clear(i);
        }
    }
}

static ASA: GlobalState<Mutex<AsaState>> = GlobalState::new();

/// Initialize the address-space allocator. Pages below `KVIRT_RESERVED`
/// (the kernel image, early boot structures, and the window page) are
/// pre-marked reserved so `alloc` never hands them out.
pub fn init(page_size: usize) -> Result<(), KernelError> {
    let bits = KVIRT_MAX / page_size;
    let words = Bitset::words_for(bits);

    let storage_addr = crate::mm::placement::alloc(words * core::mem::size_of::<u32>(), 4)?;

    // SAFETY: freshly carved placement region, sized exactly for `words`
    // u32s, lives for the remainder of the kernel's life.
    let storage: &'static mut [u32] =
        unsafe { core::slice::from_raw_parts_mut(storage_addr as *mut u32, words) };

    let mut bitset = Bitset::init(storage, bits);
    let reserved_pages = (KVIRT_RESERVED / page_size).min(bits);
    for i in 0..reserved_pages {
        bitset.set(i);
    }

    ASA.init(Mutex::new(AsaState { bitset, page_size }))
        .map_err(|_| "address-space allocator already initialized".into())
}

/// Allocate `n_pages` contiguous pages of kernel virtual address space.
/// Returns the base address, or `0` if no run of that length is free.
pub fn alloc(n_pages: usize) -> usize {
    ASA.with_mut(|lock| lock.lock().alloc(n_pages)).unwrap_or(0)
}

/// Release `n_pages` pages starting at `vaddr` back to the free pool.
pub fn free(vaddr: usize, n_pages: usize) {
    ASA.with_mut(|lock| lock.lock().free(vaddr, n_pages));
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;
    const TEST_KVIRT_MAX: usize = 0x0010_0000; // 1 MiB of address space for tests
    const TEST_KVIRT_RESERVED: usize = 0x2_0000; // reserve the first 128 KiB

    fn state_over(storage: &mut [u32]) -> AsaState {
        let bits = TEST_KVIRT_MAX / PAGE_SIZE;
        let mut bitset = Bitset::init(storage, bits);
        let reserved_pages = TEST_KVIRT_RESERVED / PAGE_SIZE;
        for i in 0..reserved_pages {
            bitset.set(i);
        }
        AsaState { bitset, page_size: PAGE_SIZE }
    }

    #[test]
    fn alloc_skips_reserved_prefix() {
        let mut storage = [0u32; Bitset::words_for(0x0010_0000 / 4096)];
        let mut asa = state_over(&mut storage);
        let v = asa.alloc(1);
        assert!(v >= TEST_KVIRT_RESERVED);
    }

    #[test]
    fn alloc_then_free_allows_reuse() {
        let mut storage = [0u32; Bitset::words_for(0x0010_0000 / 4096)];
        let mut asa = state_over(&mut storage);
        let v1 = asa.alloc(4);
        assert_ne!(v1, 0);
        asa.free(v1, 4);
        let v2 = asa.alloc(4);
        assert_eq!(v1, v2);
    }

    #[test]
    fn alloc_returns_zero_when_no_run_fits() {
        let mut storage = [0u32; Bitset::words_for(0x0010_0000 / 4096)];
        let mut asa = state_over(&mut storage);
        let total_pages = TEST_KVIRT_MAX / PAGE_SIZE;
        let reserved_pages = TEST_KVIRT_RESERVED / PAGE_SIZE;
        let free_pages = total_pages - reserved_pages;
        assert_ne!(asa.alloc(free_pages), 0);
        assert_eq!(asa.alloc(1), 0);
    }

    #[test]
    fn alloc_does_not_coalesce_across_a_freed_gap() {
        let mut storage = [0u32; Bitset::words_for(0x0010_0000 / 4096)];
        let mut asa = state_over(&mut storage);
        let a = asa.alloc(2);
        let b = asa.alloc(2);
        asa.free(a, 2);
        // A 3-page request cannot be satisfied by the freed 2-page gap
        // alone; it must land past `b`.
        let c = asa.alloc(3);
        assert!(c >= b + 2 * PAGE_SIZE);
    }
}
