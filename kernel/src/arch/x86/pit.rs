//! Programmable interval timer (8253/8254)
//!
//! Channel 0 is programmed in mode 3 (square wave) at a fixed tick rate
//! and wired to IRQ0. The handler does nothing but advance a tick counter
//! -- there is no scheduler here to preempt.

use core::sync::atomic::{AtomicU64, Ordering};

const PIT_CHANNEL_0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Base oscillator frequency of the 8253/8254, in Hz.
const PIT_BASE_FREQUENCY: u32 = 1_193_182;
/// Tick rate this kernel programs the PIT to run at.
pub const PIT_HZ: u32 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Program channel 0 for [`PIT_HZ`] ticks per second.
///
/// # Safety
/// Must run before IRQ0 is unmasked, and only once.
pub unsafe fn init() {
    let divisor = (PIT_BASE_FREQUENCY / PIT_HZ) as u16;
    // SAFETY: 0x43/0x40 are the PIT's documented command and channel-0
    // data ports; this is the standard mode-3 programming sequence.
    unsafe {
        super::outb(PIT_COMMAND, 0x36);
        super::outb(PIT_CHANNEL_0, (divisor & 0xFF) as u8);
        super::outb(PIT_CHANNEL_0, ((divisor >> 8) & 0xFF) as u8);
    }
}

/// Called from the IRQ0 handler once per tick.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Total ticks observed since [`init`].
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Busy-wait for approximately `ms` milliseconds, counting PIT ticks.
pub fn wait_ms(ms: u64) {
    let target = ticks() + (ms * PIT_HZ as u64) / 1000 + 1;
    while ticks() < target {
        core::hint::spin_loop();
    }
}

/// Milliseconds elapsed since [`init`], derived from the tick count.
pub fn uptime_ms() -> u64 {
    ticks() * 1000 / PIT_HZ as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_is_in_range_for_100_hz() {
        let divisor = PIT_BASE_FREQUENCY / PIT_HZ;
        assert!(divisor > 0);
        assert!(divisor < u16::MAX as u32);
    }
}
