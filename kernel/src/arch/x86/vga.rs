//! VGA text-mode console
//!
//! Direct writes to the memory-mapped text buffer at `0xB8000`: 80x25
//! cells, each a (character, color) byte pair. This is the kernel's only
//! output device until the serial port comes up, and remains the one a
//! human watching the machine actually sees.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

#[allow(dead_code)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
struct ColorCode(u8);

impl ColorCode {
    fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

/// A single buffer cell. Reads and writes go through `read_volatile`/
/// `write_volatile` so the optimizer cannot elide or reorder them -- the
/// memory at the other end is a hardware device, not RAM the compiler is
/// free to reason about.
#[repr(transparent)]
struct VolatileCell(ScreenChar);

impl VolatileCell {
    fn read(&self) -> ScreenChar {
        // SAFETY: `self` always refers to a live cell inside the VGA
        // buffer, which is readable memory for the kernel's entire life.
        unsafe { core::ptr::read_volatile(&self.0) }
    }

    fn write(&mut self, value: ScreenChar) {
        // SAFETY: see `read`; writes here are exactly how characters reach
        // the screen.
        unsafe { core::ptr::write_volatile(&mut self.0, value) }
    }
}

#[repr(transparent)]
struct Buffer {
    chars: [[VolatileCell; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    column_position: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = BUFFER_HEIGHT - 1;
                let col = self.column_position;

                let color_code = self.color_code;
                self.buffer.chars[row][col].write(ScreenChar { ascii_character: byte, color_code });
                self.column_position += 1;
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let character = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(character);
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.column_position = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar { ascii_character: b' ', color_code: self.color_code };
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[row][col].write(blank);
        }
    }

    pub fn clear_screen(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.column_position = 0;
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        column_position: 0,
        color_code: ColorCode::new(Color::LightGray, Color::Black),
        // SAFETY: 0xB8000 is the fixed physical/identity-mapped address of
        // the VGA text-mode buffer; this is the only place that address is
        // ever reinterpreted as a `Buffer`.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    super::without_interrupts(|| {
        WRITER.lock().write_fmt(args).unwrap();
    });
}
