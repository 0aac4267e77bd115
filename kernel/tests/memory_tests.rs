//! End-to-end tests for the memory-management core, run against the real
//! frame allocator, paging layer, address-space allocator and heap wired
//! up the way boot wires them -- not mocked out.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(ferrite_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use ferrite_kernel::{
    error::KernelError,
    mm::{
        asa, frame_allocator,
        heap,
        kalloc::{self, AllocFlags},
        paging,
        paging::PageFlags,
    },
    serial_println,
};

mod common;

define_test_entry!(test_entry);

static mut BOOT_DIRECTORY: common::BootDirectory = common::BootDirectory::zeroed();

extern "C" fn test_entry() -> ! {
    // SAFETY: first and only thing that runs after `_start`.
    let directory_phys = unsafe { common::boot_to_paged(&mut BOOT_DIRECTORY) };

    // The image itself is the one range that must come back reserved;
    // there is no ELF section table to consult here, so a conservative
    // guess covering the low region the image is linked at stands in for
    // it. Must stay well below `KVIRT_RESERVED` -- that is the bound the
    // bootstrap identity map and the placement allocator both assume the
    // image fits under, and the placement allocator needs the room
    // between the reserved end and `KVIRT_RESERVED` for its own early
    // bitset storage (the ASA and frame allocator each carve one out).
    let kernel_reserved = (0x0010_0000, 0x0014_0000);

    // SAFETY: runs once, right after `boot_to_paged`.
    unsafe { common::init_mm_for_test(directory_phys, kernel_reserved) };

    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ferrite_kernel::test_panic_handler(info)
}

#[test_case]
fn frame_allocate_then_free_is_reusable() -> Result<(), KernelError> {
    let frame = frame_allocator::allocate()?;
    frame_allocator::free(frame);
    let frame2 = frame_allocator::allocate()?;
    // First-fit over a freshly-freed bit returns the same frame.
    assert_eq!(frame, frame2);
    frame_allocator::free(frame2);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn frame_allocator_avoids_kernel_image() -> Result<(), KernelError> {
    let frame = frame_allocator::allocate()?;
    let addr = frame * ferrite_kernel::mm::PAGE_SIZE;
    assert!(addr < 0x0010_0000 || addr >= 0x0014_0000);
    frame_allocator::free(frame);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn frame_allocator_exhaustion_reports_out_of_memory() -> Result<(), KernelError> {
    let mut taken = alloc::vec::Vec::new();
    loop {
        match frame_allocator::allocate() {
            Ok(frame) => taken.push(frame),
            Err(KernelError::OutOfMemory { .. }) => break,
            Err(e) => return Err(e),
        }
    }
    assert!(!taken.is_empty());
    for frame in taken {
        frame_allocator::free(frame);
    }
    // The pool is reusable once everything is returned.
    let frame = frame_allocator::allocate()?;
    frame_allocator::free(frame);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn asa_alloc_then_free_is_reusable() -> Result<(), KernelError> {
    let n_pages = 4;
    let region = asa::alloc(n_pages);
    asa::free(region, n_pages);
    let region2 = asa::alloc(n_pages);
    assert_eq!(region, region2);
    asa::free(region2, n_pages);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn asa_allocations_never_overlap() -> Result<(), KernelError> {
    let n_pages = 1;
    let size = ferrite_kernel::mm::PAGE_SIZE;
    let a = asa::alloc(n_pages);
    let b = asa::alloc(n_pages);
    assert_ne!(a, b);
    assert!(a + size <= b || b + size <= a);
    asa::free(a, n_pages);
    asa::free(b, n_pages);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn kpage_allocate_then_free_round_trips() -> Result<(), KernelError> {
    let vaddr = asa::alloc(1);
    paging::kpage_allocate(vaddr, PageFlags::WRITABLE)?;

    // SAFETY: the page was just mapped writable.
    unsafe {
        let ptr = vaddr as *mut u32;
        ptr.write_volatile(0xDEAD_BEEF);
        assert_eq!(ptr.read_volatile(), 0xDEAD_BEEF);
    }

    paging::kpage_free(vaddr)?;
    asa::free(vaddr, 1);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn kpage_identity_map_gives_matching_phys_addr() -> Result<(), KernelError> {
    let frame = frame_allocator::allocate()?;
    let phys = frame * ferrite_kernel::mm::PAGE_SIZE;

    paging::kpage_identity_map(phys, PageFlags::WRITABLE)?;
    assert_eq!(paging::kpage_get_phys(phys), phys);
    paging::kpage_free(phys)?;
    frame_allocator::free(frame);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn heap_alloc_respects_alignment() -> Result<(), KernelError> {
    let addr = heap::alloc(37, 16)?;
    assert_eq!(addr % 16, 0);
    heap::free(addr)?;
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn heap_allocations_never_overlap() -> Result<(), KernelError> {
    let a = heap::alloc(128, 8)?;
    let b = heap::alloc(128, 8)?;
    assert!(a + 128 <= b || b + 128 <= a);
    heap::free(a)?;
    heap::free(b)?;
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn kalloc_kmalloc_then_kfree_round_trips() -> Result<(), KernelError> {
    let addr = kalloc::kmalloc(64, AllocFlags::GENERAL);
    assert_ne!(addr, 0);
    // SAFETY: freshly allocated, 64-byte region.
    unsafe {
        let ptr = addr as *mut u8;
        ptr.write_bytes(0xAB, 64);
        assert_eq!(ptr.read(), 0xAB);
    }
    kalloc::kfree(addr);
    serial_println!("[ok]");
    Ok(())
}

#[test_case]
fn kalloc_page_aligned_allocation_is_page_aligned() -> Result<(), KernelError> {
    let addr = kalloc::kmalloc_a(ferrite_kernel::mm::PAGE_SIZE, AllocFlags::GENERAL);
    assert_ne!(addr, 0);
    assert_eq!(addr % ferrite_kernel::mm::PAGE_SIZE, 0);
    kalloc::kfree(addr);
    serial_println!("[ok]");
    Ok(())
}
