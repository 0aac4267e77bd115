//! Multiboot-1 boot information
//!
//! The boot loader hands two values to `_start` in `eax`/`ebx`: a magic
//! constant and a pointer to the info structure this module parses. Only
//! the two pieces the memory-management core needs are extracted -- the
//! available-memory map and the kernel image's address range as recorded
//! in the ELF section headers -- everything else in the structure (boot
//! device, command line, module list, VBE/APM tables) is left untouched.

use crate::mm::frame_allocator::MemoryRange;

/// Value the boot loader leaves in `eax` on entry.
pub const BOOT_MAGIC: u32 = 0x2BAD_B002;
/// Value stamped into the Multiboot-1 header embedded in the kernel image.
pub const HEADER_MAGIC: u32 = 0x1BAD_B002;

const FLAG_MEMORY: u32 = 1 << 0;
const FLAG_ELF_SECTIONS: u32 = 1 << 5;
const FLAG_MEMORY_MAP: u32 = 1 << 6;

/// Maximum number of memory-map entries this kernel will track. Real
/// firmware and QEMU's emulated machines report a handful; this is
/// generous headroom without needing an allocator to hold them.
pub const MAX_MEMORY_MAP_ENTRIES: usize = 32;

#[repr(C, packed)]
struct RawInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    // aout symbol table or ELF section header table, depending on flags.
    elf_num: u32,
    elf_size: u32,
    elf_addr: u32,
    elf_shndx: u32,
    mmap_length: u32,
    mmap_addr: u32,
    // Remaining fields (drives, config table, boot loader name, APM, VBE)
    // are not read by this kernel.
}

#[repr(C, packed)]
struct RawMmapEntry {
    size: u32,
    base_addr: u64,
    length: u64,
    typ: u32,
}

#[repr(C, packed)]
struct Elf32SectionHeader {
    name: u32,
    sh_type: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    addralign: u32,
    entsize: u32,
}

const MMAP_AVAILABLE: u32 = 1;

/// Everything the memory-management core needs out of the boot
/// information, already reduced to the shapes [`crate::mm::init`] takes.
pub struct ParsedBootInfo {
    pub mem_top: usize,
    pub memory_map: [MemoryRange; MAX_MEMORY_MAP_ENTRIES],
    pub memory_map_len: usize,
    pub kernel_reserved: (usize, usize),
    pub bootinfo_reserved: (usize, usize),
}

/// Parse the Multiboot-1 info structure at `info_addr`, after checking
/// `magic` against [`BOOT_MAGIC`].
///
/// # Panics
/// Panics if the magic does not match, or if the loader did not set the
/// memory-map or ELF-sections flag -- both are required inputs the rest of
/// boot depends on.
///
/// # Safety
/// `info_addr` must be the pointer the boot loader passed in `ebx`,
/// referencing a structure that is still mapped and unmodified.
pub unsafe fn parse(magic: u32, info_addr: usize) -> ParsedBootInfo {
    assert_eq!(magic, BOOT_MAGIC, "unexpected boot magic {:#010x}", magic);

    // SAFETY: caller guarantees `info_addr` is the loader-provided struct.
    let info = unsafe { &*(info_addr as *const RawInfo) };

    assert!(
        info.flags & FLAG_MEMORY_MAP != 0,
        "boot loader did not provide a memory map"
    );
    assert!(
        info.flags & FLAG_ELF_SECTIONS != 0,
        "boot loader did not provide ELF section headers"
    );

    let mem_top = if info.flags & FLAG_MEMORY != 0 {
        (info.mem_upper as usize) * 1024
    } else {
        0
    };

    let mut memory_map = [MemoryRange { base: 0, length: 0, available: false }; MAX_MEMORY_MAP_ENTRIES];
    let mut memory_map_len = 0usize;

    let mmap_end = info.mmap_addr as usize + info.mmap_length as usize;
    let mut cursor = info.mmap_addr as usize;
    while cursor < mmap_end && memory_map_len < MAX_MEMORY_MAP_ENTRIES {
        // SAFETY: `cursor` stays within `[mmap_addr, mmap_addr + mmap_length)`,
        // a region the loader guarantees is valid and readable.
        let entry = unsafe { &*(cursor as *const RawMmapEntry) };
        memory_map[memory_map_len] = MemoryRange {
            base: entry.base_addr as usize,
            length: entry.length as usize,
            available: entry.typ == MMAP_AVAILABLE,
        };
        memory_map_len += 1;
        // The `size` field does not count itself.
        cursor += entry.size as usize + core::mem::size_of::<u32>();
    }

    let kernel_reserved = elf_section_bounds(info);

    let bootinfo_reserved = (info_addr, info_addr + core::mem::size_of::<RawInfo>());

    ParsedBootInfo {
        mem_top,
        memory_map,
        memory_map_len,
        kernel_reserved,
        bootinfo_reserved,
    }
}

/// `(first real section's sh_addr, last section's sh_addr)`, per the
/// contract this kernel relies on the ELF section headers for.
fn elf_section_bounds(info: &RawInfo) -> (usize, usize) {
    let count = info.elf_num as usize;
    if count == 0 {
        return (0, 0);
    }

    let base = info.elf_addr as usize;
    let entsize = info.elf_size as usize;

    let mut first = 0usize;
    for i in 0..count {
        // SAFETY: `base` and `entsize` come from the loader-provided
        // section header table, valid for `count` entries.
        let sh = unsafe { &*((base + i * entsize) as *const Elf32SectionHeader) };
        if sh.addr != 0 {
            first = sh.addr as usize;
            break;
        }
    }

    // SAFETY: `count - 1` is in range, checked by the `count == 0` guard
    // above.
    let last = unsafe { &*((base + (count - 1) * entsize) as *const Elf32SectionHeader) };

    (first, last.addr as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_magic_is_the_documented_constant() {
        assert_eq!(BOOT_MAGIC, 0x2BAD_B002);
    }

    #[test]
    fn header_magic_is_the_documented_constant() {
        assert_eq!(HEADER_MAGIC, 0x1BAD_B002);
    }

    #[test]
    fn mmap_entry_iteration_skips_the_size_field_itself() {
        // Two entries back to back: a 20-byte body (size=20) followed by
        // another. `next = current + current.size + sizeof(size_field)`.
        let raw: [u8; 48] = {
            let mut buf = [0u8; 48];
            buf[0..4].copy_from_slice(&20u32.to_le_bytes());
            buf[24..28].copy_from_slice(&20u32.to_le_bytes());
            buf
        };
        let first_size = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let next = 0 + first_size as usize + 4;
        assert_eq!(next, 24);
    }
}
