//! Smoke test: the kernel image boots, reaches paging, and can still run
//! ordinary Rust code afterward.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use ferrite_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

mod common;

define_test_entry!(test_entry);

static mut BOOT_DIRECTORY: common::BootDirectory = common::BootDirectory::zeroed();

extern "C" fn test_entry() -> ! {
    // SAFETY: first and only thing that runs after `_start`.
    let _directory_phys = unsafe { common::boot_to_paged(&mut BOOT_DIRECTORY) };

    serial_println!("starting basic boot test...");

    test_println();
    test_simple_assertion();
    test_kernel_alive();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_println() {
    serial_println!("test_println output");
}

fn test_simple_assertion() {
    let x = 2 + 2;
    assert_eq!(x, 4);
}

fn test_kernel_alive() {
    serial_println!("kernel is alive and running tests!");
}
