//! Global descriptor table
//!
//! A flat, three-entry GDT: a null descriptor, one 4 GiB code segment, and
//! one 4 GiB data segment, both based at 0. There is no per-process
//! segmentation in this kernel -- the `USER`/supervisor split this kernel
//! cares about lives in page-table flags, not in segment descriptors -- so
//! a ring-3 code/data pair and a TSS are not installed.

use core::arch::global_asm;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const NULL: GdtEntry = GdtEntry {
        limit_low: 0,
        base_low: 0,
        base_middle: 0,
        access: 0,
        granularity: 0,
        base_high: 0,
    };

    fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (granularity & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Kernel code segment selector (index 1, ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Kernel data segment selector (index 2, ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

const ENTRY_COUNT: usize = 3;

static mut GDT: [GdtEntry; ENTRY_COUNT] = [GdtEntry::NULL; ENTRY_COUNT];
static mut GDT_POINTER: GdtPointer = GdtPointer { limit: 0, base: 0 };

extern "C" {
    fn ferrite_gdt_flush(ptr: *const GdtPointer);
}

global_asm!(
    ".global ferrite_gdt_flush",
    "ferrite_gdt_flush:",
    "mov eax, [esp + 4]",
    "lgdt [eax]",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "mov ss, ax",
    "jmp 0x08:1f",
    "1:",
    "ret",
);

/// Install the flat GDT and reload every segment register to point at it.
///
/// # Safety
/// Must run before any other code relies on the previous (boot loader
/// supplied) GDT remaining valid, and only once.
pub unsafe fn init() {
    // SAFETY: single-threaded boot code, no concurrent access to the
    // static table.
    unsafe {
        GDT[0] = GdtEntry::NULL;
        GDT[1] = GdtEntry::new(0, 0xFFFF_FFFF, 0x9A, 0xCF); // code: present, ring0, exec/read
        GDT[2] = GdtEntry::new(0, 0xFFFF_FFFF, 0x92, 0xCF); // data: present, ring0, read/write

        GDT_POINTER = GdtPointer {
            limit: (core::mem::size_of::<[GdtEntry; ENTRY_COUNT]>() - 1) as u16,
            base: GDT.as_ptr() as u32,
        };

        ferrite_gdt_flush(&GDT_POINTER);
    }
}
