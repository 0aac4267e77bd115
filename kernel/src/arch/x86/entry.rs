//! Boot entry point
//!
//! The raw `_start` trampoline and the embedded Multiboot header live in
//! the binary crate's `main.rs`, not here -- a `global_asm!` block with no
//! Rust caller is liable to be dropped by the linker when it only exists
//! inside this library's rlib. `_start` sets up a stack (the loader does
//! not guarantee one), forwards the magic and info pointer the loader left
//! in `eax`/`ebx`, and calls [`ferrite_entry`] by its bare symbol name,
//! which never returns and does everything from there: parsing the
//! Multiboot info to building the bootstrap page directory used to turn
//! paging on, ending in a hand-off to [`crate::run`].

use super::multiboot;
use crate::mm::paging;

#[repr(align(4096))]
struct BootDirectory([u32; paging::ENTRIES_PER_TABLE]);

static mut BOOT_DIRECTORY: BootDirectory = BootDirectory([0; paging::ENTRIES_PER_TABLE]);

extern "C" {
    static _kernel_end: u8;
}

/// Reached from `_start` with the loader's magic and info pointer already
/// pushed as cdecl arguments. Brings the CPU up from reset to a live
/// paged address space, then hands off to [`crate::run`].
#[no_mangle]
extern "C" fn ferrite_entry(magic: u32, info_addr: u32) -> ! {
    // SAFETY: first thing to touch COM1; nothing has run before it.
    unsafe { super::early_serial::init() };
    crate::early_println!("booting (magic={:#010x}, info={:#010x})", magic, info_addr);

    // SAFETY: `info_addr` is exactly what the loader passed in `ebx`,
    // untouched since reset.
    let boot_info = unsafe { multiboot::parse(magic, info_addr as usize) };

    // SAFETY: runs once, before the GDT the loader left is relied on for
    // anything else.
    unsafe { super::gdt::init() };
    // SAFETY: runs once, after the GDT (handlers use its code selector),
    // before interrupts are unmasked.
    unsafe { super::idt::init() };

    // SAFETY: `BOOT_DIRECTORY` is zeroed `.bss`, page-aligned, and not
    // touched anywhere else; this runs before paging is enabled.
    let directory_phys = unsafe { paging::bootstrap_identity_map(&mut BOOT_DIRECTORY.0) };

    // SAFETY: `directory_phys` was just built by `bootstrap_identity_map`
    // and identity-maps the code currently executing.
    unsafe {
        paging::load_page_dir(directory_phys);
        paging::enable_paging();
    }

    // SAFETY: `_kernel_end` is a linker-provided symbol marking the first
    // byte past the kernel image; it has no meaningful type, only an
    // address.
    let placement_start = unsafe { &_kernel_end as *const u8 as usize };

    crate::run(boot_info, placement_start, directory_phys)
}
