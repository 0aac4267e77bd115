//! Paging layer
//!
//! Maintains the kernel's page directory and page tables, using the
//! window-page strategy to resolve the bootstrap problem of editing a page
//! table through a virtual address before that table is itself mapped
//! anywhere permanent: one virtual page (`WINDOW_VADDR`) is kept
//! identity-mapped via a statically allocated page table that is part of
//! the kernel image (and therefore always resident), and every directory
//! or page-table read/write goes through it. Rewriting the window's PTE
//! and invalidating its TLB entry makes an arbitrary physical frame
//! temporarily readable/writable at `WINDOW_VADDR`; any pointer obtained
//! this way is invalid the moment another call rewrites the window, so
//! callers must re-fetch after every nested call rather than cache it.
//!
//! [`pagepool`] documents the alternative strategy this kernel did not
//! choose.

pub mod pagepool;

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{frame_allocator, KVIRT_RESERVED, PAGE_SIZE},
    sync::GlobalState,
};

bitflags! {
    /// Flag bits shared by page directory and page table entries (the low
    /// 12 bits below the frame address).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const GLOBAL        = 1 << 8;
    }
}

pub const ENTRIES_PER_TABLE: usize = 1024;
const ADDR_MASK: u32 = !0xFFF;

/// The single reserved virtual page used to temporarily view arbitrary
/// physical frames. Sits just below [`KVIRT_RESERVED`], inside the
/// always-mapped early region.
pub const WINDOW_VADDR: usize = KVIRT_RESERVED - PAGE_SIZE;

fn split(vaddr: usize) -> (usize, usize) {
    let page = vaddr / PAGE_SIZE;
    (page / ENTRIES_PER_TABLE, page % ENTRIES_PER_TABLE)
}

fn entry_present(entry: u32) -> bool {
    entry & PageFlags::PRESENT.bits() != 0
}

fn entry_addr(entry: u32) -> usize {
    (entry & ADDR_MASK) as usize
}

/// Decoded bits of a page-fault error code, per the architecture's
/// exception-14 convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInfo {
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub reserved_bit_violation: bool,
    pub instruction_fetch: bool,
}

impl FaultInfo {
    pub fn decode(error_code: u32) -> Self {
        Self {
            present: error_code & 0x1 != 0,
            write: error_code & 0x2 != 0,
            user: error_code & 0x4 != 0,
            reserved_bit_violation: error_code & 0x8 != 0,
            instruction_fetch: error_code & 0x10 != 0,
        }
    }
}

#[repr(align(4096))]
struct AlignedTable([u32; ENTRIES_PER_TABLE]);

/// The page table backing [`WINDOW_VADDR`]'s own PTE. Lives in the kernel
/// image's `.bss`, so it is resident from the moment the kernel's static
/// data is mapped -- no windowing is needed to reach it, which is what
/// breaks the bootstrap cycle for every other table.
static mut WINDOW_TABLE: AlignedTable = AlignedTable([0; ENTRIES_PER_TABLE]);

fn window_pt_index() -> usize {
    split(WINDOW_VADDR).1
}

/// Point `WINDOW_VADDR` at `phys_addr` and invalidate its TLB entry.
/// Returns a pointer to the 1024 `u32` entries now visible there.
///
/// # Safety
/// The caller must not retain the returned pointer across another call to
/// `window_map`; the window is a single shared slot.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
unsafe fn window_map(phys_addr: usize) -> *mut u32 {
    let idx = window_pt_index();
    // SAFETY: WINDOW_TABLE is a single statically allocated page, written
    // only through this function, which is never reentered concurrently
    // under the single-threaded boot model.
    unsafe {
        WINDOW_TABLE.0[idx] = (phys_addr as u32 & ADDR_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();
        invlpg(WINDOW_VADDR);
    }
    WINDOW_VADDR as *mut u32
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
unsafe fn invlpg(vaddr: usize) {
    // SAFETY: `invlpg` only affects the TLB entry for `vaddr`; it has no
    // effect on program state other than forcing a future page walk.
    unsafe {
        core::arch::asm!("invlpg [{0}]", in(reg) vaddr, options(nostack, preserves_flags));
    }
}

/// Load `phys` into CR3, switching the active page directory.
///
/// # Safety
/// `phys` must be a valid, fully populated page directory physical
/// address whose low identity-mapped region covers the code currently
/// executing and [`WINDOW_VADDR`]'s own table.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
pub unsafe fn load_page_dir(phys: usize) {
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) phys, options(nostack, preserves_flags));
    }
}

/// Set CR0.PG, turning on paging.
///
/// # Safety
/// Must be called exactly once, after `load_page_dir`, with the
/// instruction and stack pointers already valid under the installed
/// mapping.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
pub unsafe fn enable_paging() {
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

/// Read CR2, the faulting address left by the most recent page fault.
/// Safe to call from the exception-14 stub; has no side effects.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
pub fn get_faulting_address() -> usize {
    let cr2: usize;
    // SAFETY: reading CR2 has no side effects.
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) cr2, options(nostack, preserves_flags));
    }
    cr2
}

/// Build the bootstrap identity map and return the directory's physical
/// address. Must run before paging is enabled, while virtual and physical
/// addresses still coincide for anything inside the kernel image -- which
/// is exactly what lets this function hand back `WINDOW_TABLE`'s own
/// address as its physical address without yet having any translation
/// machinery to ask.
///
/// Every table index up to and including the window's own slot is
/// identity-mapped (this is the permanently-resident low region, bounded
/// by [`KVIRT_RESERVED`]); everything past it is left not-present, so an
/// access to `KVIRT_RESERVED` itself faults until something explicitly
/// maps it.
///
/// # Safety
/// Must run exactly once, before [`load_page_dir`] and [`enable_paging`],
/// with `directory` a zeroed, page-aligned, 4096-byte region that outlives
/// the kernel (a `.bss` static, in practice).
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub unsafe fn bootstrap_identity_map(directory: &mut [u32; ENTRIES_PER_TABLE]) -> usize {
    let window_idx = window_pt_index();
    // SAFETY: runs before paging is enabled and before any other code
    // touches WINDOW_TABLE.
    unsafe {
        let window_table_phys = WINDOW_TABLE.0.as_ptr() as usize;
        for (i, slot) in WINDOW_TABLE.0.iter_mut().enumerate() {
            *slot = if i <= window_idx {
                ((i * PAGE_SIZE) as u32 & ADDR_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits()
            } else {
                0
            };
        }

        let dir_idx = split(WINDOW_VADDR).0;
        directory[dir_idx] =
            (window_table_phys as u32 & ADDR_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();

        directory.as_ptr() as usize
    }
}

struct PagingState {
    directory_phys: usize,
}

static PAGING: GlobalState<Mutex<PagingState>> = GlobalState::new();

/// Record the page directory's physical address. The directory and the
/// low identity-mapped region (including [`WINDOW_VADDR`]'s own table)
/// must already be installed by the architecture boot code before this
/// runs; this call only hands the address to the rest of the paging
/// layer.
pub fn init(directory_phys: usize) -> Result<(), KernelError> {
    PAGING
        .init(Mutex::new(PagingState { directory_phys }))
        .map_err(|_| "paging already initialized".into())
}

fn directory_phys() -> Result<usize, KernelError> {
    PAGING
        .with(|lock| lock.lock().directory_phys)
        .ok_or(KernelError::NotInitialized { subsystem: "paging" })
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn directory_entry(dir_idx: usize) -> Result<u32, KernelError> {
    let phys = directory_phys()?;
    // SAFETY: `window_map` contract: pointer used immediately, not
    // retained past this expression.
    let entry = unsafe { *window_map(phys).add(dir_idx) };
    Ok(entry)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn write_directory_entry(dir_idx: usize, value: u32) -> Result<(), KernelError> {
    let phys = directory_phys()?;
    // SAFETY: re-fetched immediately before the write, per the window
    // re-fetch-after-nested-call contract.
    unsafe {
        *window_map(phys).add(dir_idx) = value;
    }
    Ok(())
}

/// Ensure a page table exists for `dir_idx`, allocating and zeroing one if
/// absent. Returns its physical address.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn ensure_table(dir_idx: usize, dir_flags: PageFlags) -> Result<usize, KernelError> {
    let entry = directory_entry(dir_idx)?;
    if entry_present(entry) {
        return Ok(entry_addr(entry));
    }

    let table_frame = frame_allocator::allocate()?;
    let table_phys = table_frame * PAGE_SIZE;

    // SAFETY: zeroing a freshly reserved frame through the window.
    unsafe {
        let ptr = window_map(table_phys);
        for i in 0..ENTRIES_PER_TABLE {
            *ptr.add(i) = 0;
        }
    }

    write_directory_entry(
        dir_idx,
        (table_phys as u32 & ADDR_MASK) | dir_flags.bits() | PageFlags::PRESENT.bits(),
    )?;

    Ok(table_phys)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn table_entry(table_phys: usize, tab_idx: usize) -> u32 {
    // SAFETY: read-only access through the window, used immediately.
    unsafe { *window_map(table_phys).add(tab_idx) }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn write_table_entry(table_phys: usize, tab_idx: usize, value: u32) {
    // SAFETY: re-fetched immediately before the write.
    unsafe {
        *window_map(table_phys).add(tab_idx) = value;
    }
}

/// Reserve a physical frame and map `vaddr` to it, creating the
/// intermediate table if absent. `vaddr` must be page-aligned. Overwrites
/// any existing mapping.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn kpage_allocate(vaddr: usize, flags: PageFlags) -> Result<(), KernelError> {
    assert!(vaddr % PAGE_SIZE == 0, "kpage_allocate requires a page-aligned vaddr");
    let (dir_idx, tab_idx) = split(vaddr);

    let table_phys = ensure_table(dir_idx, flags)?;

    let data_frame = frame_allocator::allocate()?;
    let data_phys = data_frame * PAGE_SIZE;

    write_table_entry(
        table_phys,
        tab_idx,
        (data_phys as u32 & ADDR_MASK) | flags.bits() | PageFlags::PRESENT.bits(),
    );

    Ok(())
}

/// Clear the PTE for `vaddr` and release the underlying frame. Reports
/// `InvalidAddress` if the parent table is not present. Invalidates the
/// TLB entry for `vaddr`.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn kpage_free(vaddr: usize) -> Result<(), KernelError> {
    let (dir_idx, tab_idx) = split(vaddr);
    let dir_entry = directory_entry(dir_idx)?;
    if !entry_present(dir_entry) {
        return Err(KernelError::InvalidAddress { addr: vaddr });
    }
    let table_phys = entry_addr(dir_entry);

    let pte = table_entry(table_phys, tab_idx);
    if entry_present(pte) {
        frame_allocator::free(entry_addr(pte) / PAGE_SIZE);
    }

    write_table_entry(table_phys, tab_idx, PageFlags::WRITABLE.bits());
    // SAFETY: invalidates only the TLB entry for `vaddr`.
    unsafe { invlpg(vaddr) };

    Ok(())
}

/// Map `vaddr` to the physical address equal to itself, and mark that
/// frame reserved in the frame bitset.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn kpage_identity_map(vaddr: usize, flags: PageFlags) -> Result<(), KernelError> {
    assert!(vaddr % PAGE_SIZE == 0, "kpage_identity_map requires a page-aligned vaddr");
    let (dir_idx, tab_idx) = split(vaddr);

    let table_phys = ensure_table(dir_idx, flags)?;

    write_table_entry(
        table_phys,
        tab_idx,
        (vaddr as u32 & ADDR_MASK) | flags.bits() | PageFlags::PRESENT.bits(),
    );
    frame_allocator::mark_reserved(vaddr / PAGE_SIZE);

    Ok(())
}

/// Walk the tables for `vaddr`; return the mapped physical address, or `0`
/// if any level is absent.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn kpage_get_phys(vaddr: usize) -> usize {
    let (dir_idx, tab_idx) = split(vaddr);
    let Ok(dir_entry) = directory_entry(dir_idx) else {
        return 0;
    };
    if !entry_present(dir_entry) {
        return 0;
    }
    let table_phys = entry_addr(dir_entry);
    let pte = table_entry(table_phys, tab_idx);
    if !entry_present(pte) {
        return 0;
    }
    entry_addr(pte) + (vaddr % PAGE_SIZE)
}

/// Report a page fault. Called by the architecture's exception-14 stub
/// with the faulting address (read from CR2) and the hardware error code
/// already extracted from the interrupt frame. There is no recovery path;
/// this function does not return.
pub fn report_page_fault(fault_addr: usize, error_code: u32, instruction_pointer: usize) -> ! {
    let info = FaultInfo::decode(error_code);
    log::error!(
        "page fault at {:#010x} (ip {:#010x}): present={} write={} user={} reserved={} instruction_fetch={}",
        fault_addr,
        instruction_pointer,
        info.present,
        info.write,
        info.user,
        info.reserved_bit_violation,
        info.instruction_fetch
    );
    panic!("unrecoverable page fault at {:#010x}", fault_addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_recovers_directory_and_table_index() {
        let vaddr = 0x0040_1000; // dir_idx 1, tab_idx 1
        assert_eq!(split(vaddr), (1, 1));
    }

    #[test]
    fn split_of_window_vaddr_is_stable() {
        let (d, t) = split(WINDOW_VADDR);
        assert_eq!(d * 1024 * PAGE_SIZE + t * PAGE_SIZE, WINDOW_VADDR);
    }

    #[test]
    fn entry_present_and_addr_round_trip() {
        let entry = (0x0040_0000u32 & ADDR_MASK) | PageFlags::PRESENT.bits();
        assert!(entry_present(entry));
        assert_eq!(entry_addr(entry), 0x0040_0000);
    }

    #[test]
    fn entry_not_present_when_bit_clear() {
        let entry = 0x0040_0000u32 & ADDR_MASK;
        assert!(!entry_present(entry));
    }

    #[test]
    fn fault_info_decodes_all_bits() {
        let info = FaultInfo::decode(0b11111);
        assert_eq!(
            info,
            FaultInfo {
                present: true,
                write: true,
                user: true,
                reserved_bit_violation: true,
                instruction_fetch: true,
            }
        );
    }

    #[test]
    fn fault_info_decodes_read_only_not_present() {
        let info = FaultInfo::decode(0);
        assert!(!info.present);
        assert!(!info.write);
    }
}
