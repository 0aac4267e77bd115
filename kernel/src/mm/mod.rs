//! Memory management core
//!
//! Five layers, brought up in order during boot:
//!
//! 1. [`placement`] -- a bump allocator seeded just past the kernel image,
//!    used only until the heap exists.
//! 2. [`frame_allocator`] -- tracks physical frame availability in a single
//!    bitset.
//! 3. [`paging`] -- maps virtual pages to physical frames using the
//!    window-page strategy.
//! 4. [`asa`] -- hands out ranges of free kernel virtual address space.
//! 5. [`heap`] -- a block-list allocator backing `kalloc`.
//!
//! [`bitset`] is the shared bit-array primitive used by layers 2, 4 and 5.

pub mod asa;
pub mod bitset;
pub mod frame_allocator;
pub mod heap;
pub mod kalloc;
pub mod paging;
pub mod placement;

/// Bytes per page/frame. Fixed for the 32-bit non-PAE paging scheme this
/// kernel targets.
pub const PAGE_SIZE: usize = 4096;

/// Lowest kernel virtual address the address-space allocator may hand out.
/// Addresses below this are reserved for the kernel image, its early boot
/// structures, and the window page.
pub const KVIRT_RESERVED: usize = 0x179000;

/// Highest kernel virtual address the address-space allocator will ever
/// consider (inclusive upper bound of the kernel's share of the address
/// space).
pub const KVIRT_MAX: usize = 0x3FFF_FFFF;

/// Bring up the full memory-management stack. Must run exactly once, early
/// in boot, after the architecture layer has parsed the multiboot
/// information structure.
///
/// `mem_top` is `mem_upper * 1024`; `memory_map`, `kernel_reserved`, and
/// `bootinfo_reserved` come from the boot loader's info structure.
pub fn init(
    mem_top: usize,
    memory_map: &[frame_allocator::MemoryRange],
    kernel_reserved: (usize, usize),
    bootinfo_reserved: (usize, usize),
    placement_start: usize,
    placement_limit: usize,
    directory_phys: usize,
) -> Result<(), crate::error::KernelError> {
    placement::init(placement_start, placement_limit);
    frame_allocator::init(mem_top, memory_map, kernel_reserved, bootinfo_reserved)?;
    paging::init(directory_phys)?;
    asa::init(PAGE_SIZE)?;

    // The frame and ASA bitsets' own backing storage was just carved out of
    // the placement allocator above; classify_frame never saw those
    // addresses; mark them reserved now so the heap's first `kpage_allocate`
    // call can't be handed one of those frames and corrupt live allocator
    // metadata.
    frame_allocator::reserve_range(placement_start, placement::current());

    heap::init()?;
    kalloc::init();
    Ok(())
}
