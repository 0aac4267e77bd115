//! PS/2 keyboard (IRQ1), US scancode set 1
//!
//! Decodes make codes into ASCII using the standard set-1 layout; break
//! codes (high bit set) and unmapped keys are dropped. Decoded characters
//! land in a small ring buffer that [`read_char`] drains -- there is no
//! line discipline or TTY here, that belongs to the out-of-scope VFS/
//! console stack.

const DATA_PORT: u16 = 0x60;
const BUFFER_CAPACITY: usize = 16;

/// Unshifted US QWERTY set-1 scancode -> ASCII. `0` marks an unmapped
/// scancode (function keys, modifiers, and similar are dropped).
static SCANCODE_ASCII: [u8; 128] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

const BREAK_CODE_BIT: u8 = 0x80;

struct RingBuffer {
    storage: [u8; BUFFER_CAPACITY],
    head: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        RingBuffer { storage: [0; BUFFER_CAPACITY], head: 0, len: 0 }
    }

    fn push(&mut self, byte: u8) {
        if self.len == BUFFER_CAPACITY {
            // Drop the oldest byte to make room; a full input buffer means
            // nobody is draining it.
            self.head = (self.head + 1) % BUFFER_CAPACITY;
            self.len -= 1;
        }
        let tail = (self.head + self.len) % BUFFER_CAPACITY;
        self.storage[tail] = byte;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.storage[self.head];
        self.head = (self.head + 1) % BUFFER_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

static BUFFER: spin::Mutex<RingBuffer> = spin::Mutex::new(RingBuffer::new());

/// Called from the IRQ1 handler. Reads one scancode, decodes it, and
/// buffers the result if it is a recognized make code.
pub fn handle_irq() {
    // SAFETY: 0x60 is the PS/2 controller's data port; reading it is how
    // IRQ1 is acknowledged at the device level.
    let scancode = unsafe { super::inb(DATA_PORT) };

    if scancode & BREAK_CODE_BIT != 0 {
        return;
    }

    let ascii = SCANCODE_ASCII[(scancode & 0x7F) as usize];
    if ascii != 0 {
        BUFFER.lock().push(ascii);
    }
}

/// Drain one decoded character, if any are buffered.
pub fn read_char() -> Option<u8> {
    BUFFER.lock().pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drains_in_order() {
        let mut rb = RingBuffer::new();
        rb.push(b'a');
        rb.push(b'b');
        assert_eq!(rb.pop(), Some(b'a'));
        assert_eq!(rb.pop(), Some(b'b'));
        assert_eq!(rb.pop(), None);
    }

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let mut rb = RingBuffer::new();
        for i in 0..BUFFER_CAPACITY + 1 {
            rb.push(i as u8);
        }
        assert_eq!(rb.pop(), Some(1));
    }

    #[test]
    fn scancode_for_a_key_is_lowercase_a() {
        assert_eq!(SCANCODE_ASCII[0x1E], b'a');
    }
}
