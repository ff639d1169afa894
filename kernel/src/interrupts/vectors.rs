//! Named interrupt vector constants. Mirrors `interrupts.h`'s
//! `INT_IRQ_OFFSET`/`MIN_INTERRUPT_LINE`/`MAX_INTERRUPT_LINE` layout.
use arch_x86_64::idt;

pub use idt::{
    ALIGNMENT_CHECK, BOUND_RANGE_EXCEEDED, BREAKPOINT, DEBUG, DEVICE_NOT_AVAILABLE, DIVIDE_ERROR,
    DOUBLE_FAULT, GENERAL_PROTECTION_FAULT, INVALID_OPCODE, INVALID_TSS, MACHINE_CHECK,
    NON_MASKABLE_INTERRUPT, OVERFLOW, PAGE_FAULT, SEGMENT_NOT_PRESENT, SIMD_FLOATING_POINT,
    STACK_SEGMENT_FAULT, X87_FLOATING_POINT,
};

pub const MIN_EXC_VEC: usize = 0;
pub const MAX_EXC_VEC: usize = 31;

/// First vector handed out to an external IRQ (PIC/IOAPIC remap base).
pub const IRQ_BASE: usize = 0x20;
pub const IRQ_COUNT: usize = 16;

pub const TIMER_IRQ_LINE: u8 = 0;
pub const TIMER_INTERRUPT_LINE: usize = IRQ_BASE + TIMER_IRQ_LINE as usize;

/// Software reschedule request, distinct from the timer tick.
pub const SCHEDULER_SW_INT_LINE: usize = 0x21;
pub const PANIC_INT_LINE: usize = 0x2A;
pub const SPURIOUS_INT_LINE: usize = 0xFF;

pub const MIN_INTERRUPT_LINE: usize = IRQ_BASE;
pub const MAX_INTERRUPT_LINE: usize = SPURIOUS_INT_LINE - 1;

pub fn irq_to_vector(irq: u8) -> usize {
    IRQ_BASE + irq as usize
}

pub fn vector_to_irq(vector: usize) -> Option<u8> {
    if (IRQ_BASE..IRQ_BASE + IRQ_COUNT).contains(&vector) {
        Some((vector - IRQ_BASE) as u8)
    } else {
        None
    }
}
