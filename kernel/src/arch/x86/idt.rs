//! Interrupt descriptor table and ISR/IRQ dispatch
//!
//! Builds a 32-bit IDT (each entry a packed `offset_1/selector/zero/
//! type_attr/offset_2` descriptor) and a matching set of assembly
//! trampolines for the 32 CPU exceptions and the 16 PIC-remapped IRQs.
//! Every trampoline funnels into one of two common stubs that save the
//! full register file in the order the out-of-scope panic/debug tooling
//! expects (`gs, fs, es, ds, edi, esi, ebp, esp, ebx, edx, ecx, eax,
//! int_no, err_code, eip, cs, eflags, useresp, ss`), then calls into Rust.
//!
//! Exception vector 14 (page fault) is the one entry this module is
//! contractually required to wire up: its handler reads CR2 and the
//! hardware error code and hands both to
//! [`crate::mm::paging::report_page_fault`], which never returns.

use core::arch::global_asm;

use crate::mm::paging;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_1: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_2: u16,
}

impl IdtEntry {
    const MISSING: IdtEntry = IdtEntry { offset_1: 0, selector: 0, zero: 0, type_attr: 0, offset_2: 0 };

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        IdtEntry {
            offset_1: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_2: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

const ENTRY_COUNT: usize = 256;
/// Present, ring 0, 32-bit interrupt gate.
const GATE_INTERRUPT_32: u8 = 0x8E;

static mut IDT: [IdtEntry; ENTRY_COUNT] = [IdtEntry::MISSING; ENTRY_COUNT];
static mut IDT_POINTER: IdtPointer = IdtPointer { limit: 0, base: 0 };

/// Register file captured by the common ISR/IRQ stub, in stack order.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Regs {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

extern "C" {
    fn ferrite_idt_flush(ptr: *const IdtPointer);

    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();

    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
}

global_asm!(
    ".global ferrite_idt_flush",
    "ferrite_idt_flush:",
    "mov eax, [esp + 4]",
    "lidt [eax]",
    "ret",
    //
    // Common trampoline for CPU exceptions. Entered with `int_no` and
    // `err_code` (real or a zero placeholder) already on the stack, right
    // below whatever the CPU pushed automatically.
    "isr_common_stub:",
    "pusha",
    "push ds",
    "push es",
    "push fs",
    "push gs",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push esp",
    "call ferrite_isr_handler",
    "add esp, 4",
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popa",
    "add esp, 8",
    "iretd",
    //
    "irq_common_stub:",
    "pusha",
    "push ds",
    "push es",
    "push fs",
    "push gs",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push esp",
    "call ferrite_irq_handler",
    "add esp, 4",
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popa",
    "add esp, 8",
    "iretd",
);

macro_rules! isr_stub_noerr {
    ($asm_name:literal, $num:literal) => {
        concat!(".global ", $asm_name, "\n", $asm_name, ":\n", "push 0\n", "push ", $num, "\n", "jmp isr_common_stub\n")
    };
}

macro_rules! isr_stub_err {
    ($asm_name:literal, $num:literal) => {
        concat!(".global ", $asm_name, "\n", $asm_name, ":\n", "push ", $num, "\n", "jmp isr_common_stub\n")
    };
}

macro_rules! irq_stub {
    ($asm_name:literal, $num:literal) => {
        concat!(".global ", $asm_name, "\n", $asm_name, ":\n", "push 0\n", "push ", $num, "\n", "jmp irq_common_stub\n")
    };
}

global_asm!(concat!(
    isr_stub_noerr!("isr0", "0"),
    isr_stub_noerr!("isr1", "1"),
    isr_stub_noerr!("isr2", "2"),
    isr_stub_noerr!("isr3", "3"),
    isr_stub_noerr!("isr4", "4"),
    isr_stub_noerr!("isr5", "5"),
    isr_stub_noerr!("isr6", "6"),
    isr_stub_noerr!("isr7", "7"),
    isr_stub_err!("isr8", "8"),
    isr_stub_noerr!("isr9", "9"),
    isr_stub_err!("isr10", "10"),
    isr_stub_err!("isr11", "11"),
    isr_stub_err!("isr12", "12"),
    isr_stub_err!("isr13", "13"),
    isr_stub_err!("isr14", "14"),
    isr_stub_noerr!("isr15", "15"),
    isr_stub_noerr!("isr16", "16"),
    isr_stub_err!("isr17", "17"),
    isr_stub_noerr!("isr18", "18"),
    isr_stub_noerr!("isr19", "19"),
    isr_stub_noerr!("isr20", "20"),
    isr_stub_noerr!("isr21", "21"),
    isr_stub_noerr!("isr22", "22"),
    isr_stub_noerr!("isr23", "23"),
    isr_stub_noerr!("isr24", "24"),
    isr_stub_noerr!("isr25", "25"),
    isr_stub_noerr!("isr26", "26"),
    isr_stub_noerr!("isr27", "27"),
    isr_stub_noerr!("isr28", "28"),
    isr_stub_noerr!("isr29", "29"),
    isr_stub_noerr!("isr30", "30"),
    isr_stub_noerr!("isr31", "31"),
));

global_asm!(concat!(
    irq_stub!("irq0", "32"),
    irq_stub!("irq1", "33"),
    irq_stub!("irq2", "34"),
    irq_stub!("irq3", "35"),
    irq_stub!("irq4", "36"),
    irq_stub!("irq5", "37"),
    irq_stub!("irq6", "38"),
    irq_stub!("irq7", "39"),
    irq_stub!("irq8", "40"),
    irq_stub!("irq9", "41"),
    irq_stub!("irq10", "42"),
    irq_stub!("irq11", "43"),
    irq_stub!("irq12", "44"),
    irq_stub!("irq13", "45"),
    irq_stub!("irq14", "46"),
    irq_stub!("irq15", "47"),
));

fn set_gate(num: u8, handler: unsafe extern "C" fn()) {
    // SAFETY: indexing with a `u8` is always in range of the 256-entry
    // table; writes happen only during single-threaded init.
    unsafe {
        IDT[num as usize] = IdtEntry::new(handler as usize as u32, super::gdt::KERNEL_CODE_SELECTOR, GATE_INTERRUPT_32);
    }
}

/// Build the IDT and load it.
///
/// # Safety
/// Must run after [`super::gdt::init`] (handlers reference the kernel code
/// selector) and before interrupts are enabled.
pub unsafe fn init() {
    set_gate(0, isr0);
    set_gate(1, isr1);
    set_gate(2, isr2);
    set_gate(3, isr3);
    set_gate(4, isr4);
    set_gate(5, isr5);
    set_gate(6, isr6);
    set_gate(7, isr7);
    set_gate(8, isr8);
    set_gate(9, isr9);
    set_gate(10, isr10);
    set_gate(11, isr11);
    set_gate(12, isr12);
    set_gate(13, isr13);
    set_gate(14, isr14);
    set_gate(15, isr15);
    set_gate(16, isr16);
    set_gate(17, isr17);
    set_gate(18, isr18);
    set_gate(19, isr19);
    set_gate(20, isr20);
    set_gate(21, isr21);
    set_gate(22, isr22);
    set_gate(23, isr23);
    set_gate(24, isr24);
    set_gate(25, isr25);
    set_gate(26, isr26);
    set_gate(27, isr27);
    set_gate(28, isr28);
    set_gate(29, isr29);
    set_gate(30, isr30);
    set_gate(31, isr31);

    set_gate(32, irq0);
    set_gate(33, irq1);
    set_gate(34, irq2);
    set_gate(35, irq3);
    set_gate(36, irq4);
    set_gate(37, irq5);
    set_gate(38, irq6);
    set_gate(39, irq7);
    set_gate(40, irq8);
    set_gate(41, irq9);
    set_gate(42, irq10);
    set_gate(43, irq11);
    set_gate(44, irq12);
    set_gate(45, irq13);
    set_gate(46, irq14);
    set_gate(47, irq15);

    // SAFETY: `IDT` outlives the pointer handed to the CPU; it is never
    // moved or deallocated.
    unsafe {
        IDT_POINTER = IdtPointer {
            limit: (core::mem::size_of::<[IdtEntry; ENTRY_COUNT]>() - 1) as u16,
            base: IDT.as_ptr() as u32,
        };
        ferrite_idt_flush(&IDT_POINTER);
    }
}

/// Entry point for every CPU exception. Named for the linker, called only
/// from `isr_common_stub`.
#[no_mangle]
extern "C" fn ferrite_isr_handler(regs: *const Regs) {
    // SAFETY: `regs` always points at the stub's own stack frame, valid
    // for the duration of this call.
    let regs = unsafe { &*regs };

    if regs.int_no == 14 {
        let fault_addr = paging::get_faulting_address();
        paging::report_page_fault(fault_addr, regs.err_code, regs.eip);
    }

    panic!(
        "unhandled CPU exception {} (err_code={:#x}, eip={:#010x}, eflags={:#010x})",
        regs.int_no, regs.err_code, regs.eip, regs.eflags
    );
}

/// Entry point for every PIC-remapped IRQ. Dispatches to the matching
/// legacy driver, then sends end-of-interrupt.
#[no_mangle]
extern "C" fn ferrite_irq_handler(regs: *const Regs) {
    // SAFETY: see `ferrite_isr_handler`.
    let regs = unsafe { &*regs };
    let irq = (regs.int_no - 32) as u8;

    match irq {
        0 => super::pit::tick(),
        1 => super::keyboard::handle_irq(),
        _ => {}
    }

    // SAFETY: acknowledges exactly the IRQ that is currently in service.
    unsafe { super::pic::notify_end_of_interrupt(irq) };
}
