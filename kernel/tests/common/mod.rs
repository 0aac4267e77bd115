//! Shared bare-metal bring-up for integration test binaries.
//!
//! Each file under `tests/` links as its own freestanding binary and, unlike
//! `main.rs`, has no Multiboot-aware entry point of its own -- QEMU boots it
//! directly the same way it boots the kernel image. [`boot_to_paged`]
//! replicates the sequence `arch::x86::entry::ferrite_entry` runs in the
//! real binary (GDT, IDT, identity-mapped paging) so the memory-management
//! core has the live hardware state it expects. Tests then call [`mm::init`]
//! themselves with a synthetic memory map, since there is no boot loader
//! here to parse a real one.

#![allow(dead_code)]

use ferrite_kernel::mm::{frame_allocator::MemoryRange, paging};

/// A page-aligned, zeroed page directory for [`boot_to_paged`]. Each test
/// binary owns one as a `.bss` static.
#[repr(align(4096))]
pub struct BootDirectory(pub [u32; paging::ENTRIES_PER_TABLE]);

impl BootDirectory {
    pub const fn zeroed() -> Self {
        Self([0; paging::ENTRIES_PER_TABLE])
    }
}

/// Bring the CPU from reset up through live identity-mapped paging.
///
/// Returns the page directory's physical address, ready to pass to
/// [`ferrite_kernel::mm::init`].
///
/// # Safety
/// Must run exactly once, first thing after `_start`, with `directory`
/// a zeroed, page-aligned `.bss` static that outlives the test.
pub unsafe fn boot_to_paged(directory: &'static mut BootDirectory) -> usize {
    // SAFETY: first thing to touch COM1; nothing has run before it.
    unsafe { ferrite_kernel::arch::x86::early_serial::init() };
    // SAFETY: runs once, before anything relies on the loader's GDT.
    unsafe { ferrite_kernel::arch::x86::gdt::init() };
    // SAFETY: runs once, after the GDT, before interrupts are unmasked.
    unsafe { ferrite_kernel::arch::x86::idt::init() };

    // SAFETY: `directory` is zeroed `.bss`, page-aligned, and not touched
    // anywhere else; this runs before paging is enabled.
    let directory_phys = unsafe { paging::bootstrap_identity_map(&mut directory.0) };

    // SAFETY: `directory_phys` was just built above and identity-maps the
    // code currently executing.
    unsafe {
        paging::load_page_dir(directory_phys);
        paging::enable_paging();
    }

    directory_phys
}

/// Total size of the synthetic memory map [`test_memory_map`] describes.
/// Comfortably inside what QEMU's default machine reports, and far enough
/// past the kernel image and this constant's own `.bss` home that frame 0
/// is never the kernel's own load address.
pub const TEST_MEM_TOP: usize = 64 * 1024 * 1024;

/// A single large usable range covering all of [`TEST_MEM_TOP`], standing
/// in for a real Multiboot memory map.
pub fn test_memory_map() -> [MemoryRange; 1] {
    [MemoryRange {
        base: 0,
        length: TEST_MEM_TOP,
        available: true,
    }]
}

/// Bring up the full memory-management core against [`test_memory_map`],
/// reserving the kernel image's own footprint the same way real boot does.
///
/// # Safety
/// Must run after [`boot_to_paged`], exactly once.
pub unsafe fn init_mm_for_test(directory_phys: usize, kernel_reserved: (usize, usize)) {
    ferrite_kernel::mm::init(
        TEST_MEM_TOP,
        &test_memory_map(),
        kernel_reserved,
        (0, 0),
        kernel_reserved.1,
        ferrite_kernel::mm::KVIRT_RESERVED,
        directory_phys,
    )
    .expect("memory management core failed to initialize");
}

/// Defines the Multiboot header, boot stack, and `_start` trampoline a
/// freestanding test binary needs, forwarding to a caller-supplied
/// `extern "C" fn() -> !` once a stack exists.
///
/// Mirrors `main.rs`'s trampoline: kept as assembly so the linker cannot
/// discard it the way it would a `global_asm!` block with no reachable
/// Rust-level caller.
#[macro_export]
macro_rules! define_test_entry {
    ($entry:path) => {
        const TEST_STACK_SIZE: usize = 64 * 1024;

        #[repr(align(16))]
        struct TestStack([u8; TEST_STACK_SIZE]);

        static mut TEST_STACK: TestStack = TestStack([0; TEST_STACK_SIZE]);

        core::arch::global_asm!(
            ".section .multiboot, \"a\"",
            ".align 4",
            ".long 0x1BADB002",
            ".long 0x00000003",
            ".long -(0x1BADB002 + 0x00000003)",
            //
            ".section .text",
            ".global _start",
            "_start:",
            "lea esp, [{stack_top} + {stack_size}]",
            "call {entry}",
            "2:",
            "hlt",
            "jmp 2b",
            stack_top = sym TEST_STACK,
            stack_size = const TEST_STACK_SIZE,
            entry = sym $entry,
        );
    };
}
