//! Kernel heap
//!
//! A block-list allocator. Each block is a contiguous, page-aligned virtual
//! region carrying its own header plus two section bitsets --
//! `used_sections` and `delimiters` -- immediately followed by the data
//! sections they describe. Allocation is first-fit-with-wraparound inside
//! a block, advancing block to block; when every block is exhausted and
//! the heap's auto-expand policy is set, a fresh block is carved out of
//! the address-space allocator and mapped in.
//!
//! Once [`init`] has run, [`super::kalloc`] routes every `kmalloc*` call
//! here instead of the placement allocator.

use core::ptr::NonNull;

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{asa, bitset::Bitset, paging, PAGE_SIZE},
    sync::GlobalState,
};

bitflags! {
    /// Heap-wide policy bits, alongside the per-block `section_size` and
    /// `min_block_size` the data model also names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeapFlags: u32 {
        /// Carve a new block from the ASA when every existing block is
        /// exhausted, instead of failing the allocation outright.
        const AUTO_EXPAND = 1 << 0;
    }
}

const BLOCK_MAGIC: u32 = 0x4845_4150; // "HEAP"

/// Allocation granularity inside a block.
const DEFAULT_SECTION_SIZE: usize = 64;

/// Minimum size of a freshly expanded block.
const DEFAULT_MIN_BLOCK_SIZE: usize = 16 * PAGE_SIZE;

#[repr(C)]
struct BlockHeader {
    magic: u32,
    next: Option<NonNull<BlockHeader>>,
    base: usize,
    block_size: usize,
    section_size: usize,
    n_sections: usize,
    free_sections: usize,
    first_free_section: usize,
    used_sections: Bitset<'static>,
    delimiters: Bitset<'static>,
}

impl BlockHeader {
    fn section_addr(&self, idx: usize) -> usize {
        self.base + idx * self.section_size
    }

    fn check_magic(&self) {
        debug_assert_eq!(self.magic, BLOCK_MAGIC, "heap block header corrupted");
    }

    fn find_run_in_range(&self, from: usize, to: usize, n_sec: usize) -> Option<usize> {
        let mut run_start = from;
        let mut run_len = 0usize;
        for i in from..to {
            if self.used_sections.test(i) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == n_sec {
                return Some(run_start);
            }
        }
        None
    }

    /// First-fit-with-wraparound scan for `n_sec` consecutive clear bits,
    /// starting at `first_free_section`. The two sub-ranges scanned --
    /// `[first_free_section, n_sections)` then `[0, first_free_section)` --
    /// are each contiguous in address order; a run never straddles the
    /// block's physical wraparound point.
    fn find_run(&self, n_sec: usize) -> Option<usize> {
        if n_sec == 0 || n_sec > self.n_sections {
            return None;
        }
        let start = self.first_free_section.min(self.n_sections);
        self.find_run_in_range(start, self.n_sections, n_sec)
            .or_else(|| self.find_run_in_range(0, start, n_sec))
    }

    fn commit(&mut self, run_start: usize, n_sec: usize) {
        for i in run_start..run_start + n_sec {
            self.used_sections.set(i);
        }
        self.delimiters.set(run_start + n_sec - 1);
        self.free_sections -= n_sec;
        self.first_free_section = (run_start + n_sec) % self.n_sections;
    }
}

/// Build a block's header, bitsets and bookkeeping in place over an
/// already-mapped `[base, base + block_size)` virtual region. The initial
/// sections covering the header and the two bitsets are marked
/// permanently used.
fn init_block(base: usize, block_size: usize, section_size: usize) -> NonNull<BlockHeader> {
    let header_size = core::mem::size_of::<BlockHeader>();
    let n_sections = block_size / section_size;
    let words = Bitset::words_for(n_sections);
    let bitset_bytes = words * core::mem::size_of::<u32>();

    // SAFETY: `base..base+block_size` was just mapped exclusively for this
    // block; the three regions (header, used_sections words, delimiters
    // words) are disjoint and each large enough for the type placed there.
    unsafe {
        let used_storage =
            core::slice::from_raw_parts_mut((base + header_size) as *mut u32, words);
        let delim_storage = core::slice::from_raw_parts_mut(
            (base + header_size + bitset_bytes) as *mut u32,
            words,
        );
        let mut used_sections = Bitset::init(used_storage, n_sections);
        let mut delimiters = Bitset::init(delim_storage, n_sections);

        let metadata_bytes = header_size + 2 * bitset_bytes;
        let reserved_sections = metadata_bytes.div_ceil(section_size).min(n_sections);
        for i in 0..reserved_sections {
            used_sections.set(i);
        }
        if reserved_sections > 0 {
            delimiters.set(reserved_sections - 1);
        }

        let header_ptr = base as *mut BlockHeader;
        header_ptr.write(BlockHeader {
            magic: BLOCK_MAGIC,
            next: None,
            base,
            block_size,
            section_size,
            n_sections,
            free_sections: n_sections - reserved_sections,
            first_free_section: reserved_sections % n_sections.max(1),
            used_sections,
            delimiters,
        });

        NonNull::new_unchecked(header_ptr)
    }
}

struct Heap {
    blocks: Option<NonNull<BlockHeader>>,
    total_free_sections: usize,
    section_size: usize,
    min_block_size: usize,
    flags: HeapFlags,
    /// Total section-quantized capacity across every registered block
    /// (`Σ block.n_sections * block.section_size`), including the sections
    /// permanently pinned by each block's own header and bitsets.
    effective_size: usize,
}

impl Heap {
    /// Map and register a fresh block sized `max(min_block_size,
    /// requested)`, rounded up to whole pages. Rolls back the virtual
    /// reservation and any pages already mapped if `kpage_allocate` fails
    /// partway through.
    fn add_block(&mut self, requested: usize) -> Result<NonNull<BlockHeader>, KernelError> {
        let block_size = core::cmp::max(self.min_block_size, requested);
        let n_pages = block_size.div_ceil(PAGE_SIZE);

        let vaddr = asa::alloc(n_pages);
        if vaddr == 0 {
            return Err(KernelError::OutOfMemory { requested: block_size, available: 0 });
        }

        let map_flags = paging::PageFlags::PRESENT | paging::PageFlags::WRITABLE;
        let mut mapped = 0usize;
        for i in 0..n_pages {
            match paging::kpage_allocate(vaddr + i * PAGE_SIZE, map_flags) {
                Ok(()) => mapped += 1,
                Err(e) => {
                    for j in 0..mapped {
                        let _ = paging::kpage_free(vaddr + j * PAGE_SIZE);
                    }
                    asa::free(vaddr, n_pages);
                    return Err(e);
                }
            }
        }

        let actual_block_size = n_pages * PAGE_SIZE;
        let mut header = init_block(vaddr, actual_block_size, self.section_size);
        // SAFETY: `header` was just constructed and is not yet reachable
        // from anywhere else.
        unsafe {
            header.as_mut().next = self.blocks;
        }
        self.blocks = Some(header);
        // SAFETY: same justification as above.
        let (free_sections, capacity) =
            unsafe { (header.as_ref().free_sections, header.as_ref().n_sections * header.as_ref().section_size) };
        self.total_free_sections += free_sections;
        self.effective_size += capacity;

        Ok(header)
    }

    fn alloc_from_block(block: &mut BlockHeader, n_sec: usize, align: usize) -> Option<usize> {
        if n_sec > block.free_sections {
            return None;
        }
        block.check_magic();
        let run_start = block.find_run(n_sec)?;
        block.commit(run_start, n_sec);
        let addr = block.section_addr(run_start);
        let addr = if align > 0 && align != block.section_size {
            (addr + align - 1) & !(align - 1)
        } else {
            addr
        };
        block.check_magic();
        Some(addr)
    }

    fn alloc(&mut self, size: usize, align: usize) -> Result<usize, KernelError> {
        let inflated = if align > 0 && align != self.section_size {
            size + align
        } else {
            size
        };
        let n_sec = inflated.div_ceil(self.section_size);

        let mut cur = self.blocks;
        while let Some(mut block_ptr) = cur {
            // SAFETY: blocks are never moved or freed once linked; the
            // pointer stays valid for the heap's life.
            let block = unsafe { block_ptr.as_mut() };
            if let Some(addr) = Self::alloc_from_block(block, n_sec, align) {
                self.total_free_sections -= n_sec;
                return Ok(addr);
            }
            cur = block.next;
        }

        if !self.flags.contains(HeapFlags::AUTO_EXPAND) {
            return Err(KernelError::OutOfMemory { requested: size, available: 0 });
        }

        let mut header = self.add_block(size)?;
        // SAFETY: the block was just registered and only reachable through
        // this call.
        let block = unsafe { header.as_mut() };
        let addr = Self::alloc_from_block(block, n_sec, align).ok_or(KernelError::OutOfMemory {
            requested: size,
            available: 0,
        })?;
        self.total_free_sections -= n_sec;
        Ok(addr)
    }

    fn free(&mut self, vaddr: usize) -> Result<(), KernelError> {
        let mut cur = self.blocks;
        while let Some(mut block_ptr) = cur {
            // SAFETY: see `alloc`.
            let block = unsafe { block_ptr.as_mut() };
            if vaddr >= block.base && vaddr < block.base + block.block_size {
                block.check_magic();
                let start = (vaddr - block.base) / block.section_size;
                assert!(block.used_sections.test(start), "free of an unallocated heap section");

                let mut end = start;
                while !block.delimiters.test(end) {
                    end += 1;
                    assert!(end < block.n_sections, "delimiter walk ran past the end of the block");
                }

                block.delimiters.clear(end);
                for i in start..=end {
                    block.used_sections.clear(i);
                }

                let freed = end - start + 1;
                block.free_sections += freed;
                self.total_free_sections += freed;
                if start < block.first_free_section {
                    block.first_free_section = start;
                }

                block.check_magic();
                return Ok(());
            }
            cur = block.next;
        }
        Err(KernelError::InvalidAddress { addr: vaddr })
    }
}

// SAFETY: every block this heap references is either heap-resident kernel
// memory carved out for the kernel's own lifetime, or storage handed to
// `Heap` exclusively; access is always serialized by `HEAP`'s mutex.
unsafe impl Send for Heap {}

static HEAP: GlobalState<Mutex<Heap>> = GlobalState::new();

/// Construct the default heap: one block sized [`DEFAULT_MIN_BLOCK_SIZE`],
/// with the auto-expand policy enabled.
pub fn init() -> Result<(), KernelError> {
    let mut heap = Heap {
        blocks: None,
        total_free_sections: 0,
        section_size: DEFAULT_SECTION_SIZE,
        min_block_size: DEFAULT_MIN_BLOCK_SIZE,
        flags: HeapFlags::AUTO_EXPAND,
        effective_size: 0,
    };
    heap.add_block(heap.min_block_size)?;
    HEAP.init(Mutex::new(heap))
        .map_err(|_| "heap already initialized".into())
}

/// Allocate `size` bytes, aligned to `align` (0 means no extra alignment
/// beyond the section granularity).
pub fn alloc(size: usize, align: usize) -> Result<usize, KernelError> {
    HEAP.with_mut(|lock| lock.lock().alloc(size, align))
        .ok_or(KernelError::NotInitialized { subsystem: "heap" })?
}

/// Release a region previously returned by [`alloc`].
pub fn free(vaddr: usize) -> Result<(), KernelError> {
    HEAP.with_mut(|lock| lock.lock().free(vaddr))
        .ok_or(KernelError::NotInitialized { subsystem: "heap" })?
}

/// Total section-quantized byte capacity across every registered block,
/// including the sections permanently pinned by each block's own header
/// and bitsets. For introspection only -- no allocation decision in
/// [`alloc`] reads this value back.
pub fn effective_size() -> usize {
    HEAP.with(|lock| lock.lock().effective_size).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTION_SIZE: usize = 64;

    // Tests build a `Heap` over host-process memory (a boxed byte buffer
    // stands in for a mapped virtual region) rather than going through
    // `asa`/`paging`, which require real page tables.
    fn leak_region(size: usize) -> usize {
        let layout = core::alloc::Layout::from_size_align(size, PAGE_SIZE).unwrap();
        // SAFETY: freed never; this is test-only and leaks intentionally,
        // mirroring the heap's own "blocks are never unmapped" model.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        ptr as usize
    }

    fn single_block_heap(block_size: usize) -> Heap {
        let base = leak_region(block_size);
        let header = init_block(base, block_size, SECTION_SIZE);
        let (free_sections, capacity) =
            unsafe { (header.as_ref().free_sections, header.as_ref().n_sections * header.as_ref().section_size) };
        Heap {
            blocks: Some(header),
            total_free_sections: free_sections,
            section_size: SECTION_SIZE,
            min_block_size: block_size,
            flags: HeapFlags::empty(),
            effective_size: capacity,
        }
    }

    #[test]
    fn alloc_then_free_round_trip() {
        let mut heap = single_block_heap(4096);
        let addr = heap.alloc(128, 0).unwrap();
        heap.free(addr).unwrap();
    }

    #[test]
    fn alloc_reuses_freed_run() {
        let mut heap = single_block_heap(4096);
        let a = heap.alloc(128, 0).unwrap();
        heap.free(a).unwrap();
        let b = heap.alloc(128, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_respects_alignment() {
        let mut heap = single_block_heap(8192);
        let addr = heap.alloc(100, 256).unwrap();
        assert_eq!(addr % 256, 0);
    }

    #[test]
    fn free_of_unmapped_address_is_invalid() {
        let mut heap = single_block_heap(4096);
        assert!(matches!(heap.free(0xDEAD_0000), Err(KernelError::InvalidAddress { .. })));
    }

    #[test]
    fn no_auto_expand_fails_once_block_is_full() {
        let mut heap = single_block_heap(4096);
        let mut allocated = alloc::vec::Vec::new();
        loop {
            match heap.alloc(SECTION_SIZE, 0) {
                Ok(addr) => allocated.push(addr),
                Err(_) => break,
            }
            if allocated.len() > 1000 {
                panic!("heap allocation never failed, runaway loop");
            }
        }
        assert!(!allocated.is_empty());
    }

    #[test]
    fn free_coalesces_full_run_back_to_single_alloc() {
        let mut heap = single_block_heap(4096);
        let addr = heap.alloc(SECTION_SIZE * 4, 0).unwrap();
        heap.free(addr).unwrap();
        let addr2 = heap.alloc(SECTION_SIZE * 4, 0).unwrap();
        assert_eq!(addr, addr2);
    }

    #[test]
    fn effective_size_grows_with_each_registered_block() {
        // `add_block` goes through `asa`/`paging`, which need a real mapped
        // address space this host-side test doesn't have; link a second
        // block by hand the same way `single_block_heap` builds the first,
        // to check the bookkeeping arithmetic in isolation.
        let mut heap = single_block_heap(4096);
        let before = heap.effective_size;

        let base = leak_region(4096);
        let mut second = init_block(base, 4096, SECTION_SIZE);
        // SAFETY: `second` was just constructed and is not yet reachable
        // from anywhere else.
        unsafe {
            second.as_mut().next = heap.blocks;
        }
        heap.blocks = Some(second);
        // SAFETY: same justification as above.
        let (free_sections, capacity) = unsafe {
            (
                second.as_ref().free_sections,
                second.as_ref().n_sections * second.as_ref().section_size,
            )
        };
        heap.total_free_sections += free_sections;
        heap.effective_size += capacity;

        assert!(heap.effective_size > before);
        assert_eq!(heap.effective_size, before + capacity);
    }
}
