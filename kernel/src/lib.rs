//! Kernel library
//!
//! Hosts the memory-management core (bitset, frame allocator, paging,
//! address-space allocator, heap, and the `kalloc` facade) along with the
//! architecture layer that brings a real machine up far enough to call
//! into it. [`run`] is the hand-off point from [`arch::x86::entry`]'s
//! assembly once paging is live.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

// On the real target the global allocator is `mm::kalloc`'s facade over
// the kernel heap (see `mm::kalloc::global_alloc`), wired up once `alloc`
// is enabled. Host test builds have no boot sequence to bring that heap
// up, so they fall back to the system allocator instead.
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod error;
mod intrinsics;
pub mod log_service;
pub mod mm;
pub mod raii;
pub mod sync;
mod test_framework;

#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

/// Heap allocation error handler. Allocation failure inside the kernel
/// heap is unrecoverable -- `kalloc_malloc_real` already distinguishes
/// recoverable (`GENERAL`) from fatal (`CRITICAL`) failure before an
/// allocation ever reaches `alloc::*`, so anything that gets here means a
/// collection type allocated without going through that policy.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}

/// Hand-off from the architecture layer once paging is live. Brings up
/// the rest of the memory-management core, the legacy drivers, and then
/// idles -- there is no scheduler here to run anything else.
///
/// Never returns.
pub fn run(
    boot_info: arch::x86::multiboot::ParsedBootInfo,
    placement_start: usize,
    directory_phys: usize,
) -> ! {
    let placement_limit = mm::KVIRT_RESERVED;

    mm::init(
        boot_info.mem_top,
        &boot_info.memory_map[..boot_info.memory_map_len],
        boot_info.kernel_reserved,
        boot_info.bootinfo_reserved,
        placement_start,
        placement_limit,
        directory_phys,
    )
    .expect("memory management core failed to initialize");

    log_service::log_init();

    // SAFETY: the memory-management core is up; this is the first and
    // only time these drivers are brought up.
    unsafe { arch::x86::init_drivers() };

    log::info!("memory management core online, mem_top={:#x}", boot_info.mem_top);
    log_service::klog(
        log_service::LogLevel::Info,
        "mm",
        "memory management core online",
    );
    println!("kernel online");

    arch::x86::halt_loop()
}

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}
