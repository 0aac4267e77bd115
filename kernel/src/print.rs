//! Print macros for kernel output
//!
//! `print!`/`println!` go to the VGA text console; `serial_print!`/
//! `serial_println!` go to the COM1 backend the test runner reads. Both
//! are no-ops when built for the host (`cargo test` on the library
//! target) -- there is no VGA buffer or UART to write to there, and the
//! mm unit tests that run on that target never need either.

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::x86::vga::_print(format_args!($($arg)*)));
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::arch::x86::serial::_print(format_args!($($arg)*)));
}

#[cfg(target_os = "none")]
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {};
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => {};
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {};
}

#[cfg(not(target_os = "none"))]
#[macro_export]
macro_rules! serial_println {
    ($($arg:tt)*) => {};
}
