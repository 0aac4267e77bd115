//! COM1 serial port
//!
//! Thin wrapper around `uart_16550`, brought up once `lazy_static`-backed
//! statics are safe to touch (early boot output before that point goes
//! through `early_serial` instead, which needs no heap or allocator).
//! Mirrors whatever `print!`/`println!` put on the VGA console so a
//! headless QEMU run (`-serial stdio`, no display) still shows boot
//! output -- this is what the test harness reads.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

const COM1: u16 = 0x3F8;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: 0x3F8 is COM1's fixed I/O base; nothing else in this
        // kernel touches that port range.
        let mut serial_port = unsafe { SerialPort::new(COM1) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    super::without_interrupts(|| {
        SERIAL1.lock().write_fmt(args).expect("serial write failed");
    });
}
