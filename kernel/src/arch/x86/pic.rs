//! 8259 PIC remap
//!
//! The two cascaded PICs default to vectors 0x08-0x0F and 0x70-0x77, which
//! collide with CPU exceptions; they are remapped to 0x20-0x2F (IRQ0 at
//! vector 32) so hardware interrupts land just past the 32 reserved
//! exception vectors. Remapping itself is handled by the `pic8259` crate;
//! this module just owns the single shared instance and exposes the
//! end-of-interrupt call the IDT's common IRQ stub needs.

use pic8259::ChainedPics;
use spin::Mutex;

const PIC_1_OFFSET: u8 = 32;
const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remap both PICs and mask every line except the timer and keyboard.
///
/// # Safety
/// Must run once, with interrupts disabled, before the IDT is loaded.
pub unsafe fn init() {
    // SAFETY: `PICS` is only touched here and from `notify_end_of_interrupt`,
    // both of which run with interrupts either disabled or already
    // confined to the single IRQ being serviced.
    unsafe {
        PICS.lock().initialize();
    }
}

/// Acknowledge the IRQ at PIC-relative index `irq` (0-15), ending the
/// current interrupt.
///
/// # Safety
/// Must be called exactly once per IRQ delivery, from the IRQ common
/// stub, after the corresponding driver handler has run.
pub unsafe fn notify_end_of_interrupt(irq: u8) {
    // SAFETY: `irq` is always 0-15, derived from `int_no - 32` by the
    // caller, within `ChainedPics`' valid vector range.
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
    }
}
