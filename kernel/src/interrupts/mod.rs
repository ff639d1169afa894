//! C5: the software-facing interrupt table and dispatcher. The hardware
//! IDT (`arch_x86_64::idt::InterruptDescriptorTable`) only ever points at
//! a handful of trampoline stubs defined in this module; the table below
//! is what `register_interrupt`/`register_exception` actually mutate.
pub mod controller;
pub mod vectors;

use core::sync::atomic::{AtomicUsize, Ordering};

use arch_x86_64::idt::InterruptDescriptorTable;
use arch_x86_64::interrupts::{self, ExceptionStackFrame, PageFaultErrorCode};
use arch_x86_64::register::RFlagsReg;
use arch_x86_64::{handler_for_vector, handler_with_error_code, handler_without_error_code};
use lazy_static::lazy_static;
use log::warn;
use util::Mutex;

use crate::error::KernelError;
use vectors::{IRQ_BASE, MAX_EXC_VEC, MAX_INTERRUPT_LINE, MIN_EXC_VEC, MIN_INTERRUPT_LINE};

pub type HandlerFn = fn(&ExceptionStackFrame, u64);

#[derive(Clone, Copy)]
struct InterruptEntry {
    enabled: bool,
    handler: HandlerFn,
}

lazy_static! {
    static ref TABLE: Mutex<[Option<InterruptEntry>; 256]> = Mutex::new([None; 256]);
    static ref IDT: Mutex<InterruptDescriptorTable> = Mutex::new(InterruptDescriptorTable::new());
}

static NEST_COUNT: AtomicUsize = AtomicUsize::new(0);
static IN_INTERRUPT: AtomicUsize = AtomicUsize::new(0);

/// Whether the caller is running on top of an interrupt frame right now.
/// `Semaphore::post` (C8) consults this to decide between an immediate
/// reschedule and deferring to whatever handler is already mid-dispatch.
pub fn in_interrupt_context() -> bool {
    IN_INTERRUPT.load(Ordering::SeqCst) > 0
}

struct InterruptContextGuard;

impl InterruptContextGuard {
    fn enter() -> Self {
        IN_INTERRUPT.fetch_add(1, Ordering::SeqCst);
        InterruptContextGuard
    }
}

impl Drop for InterruptContextGuard {
    fn drop(&mut self) {
        IN_INTERRUPT.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registers `handler` for a hardware/software vector in `[MIN_INTERRUPT_LINE,
/// MAX_INTERRUPT_LINE]`.
pub fn register_interrupt(vector: usize, handler: HandlerFn) -> Result<(), KernelError> {
    if !(MIN_INTERRUPT_LINE..=MAX_INTERRUPT_LINE).contains(&vector) {
        return Err(KernelError::UnauthorizedInterruptLine);
    }
    let mut table = TABLE.lock();
    if table[vector].is_some() {
        return Err(KernelError::InterruptAlreadyRegistered);
    }
    table[vector] = Some(InterruptEntry { enabled: true, handler });
    Ok(())
}

pub fn remove_interrupt(vector: usize) -> Result<(), KernelError> {
    if !(MIN_INTERRUPT_LINE..=MAX_INTERRUPT_LINE).contains(&vector) {
        return Err(KernelError::UnauthorizedInterruptLine);
    }
    let mut table = TABLE.lock();
    if table[vector].take().is_none() {
        return Err(KernelError::InterruptNotRegistered);
    }
    Ok(())
}

/// Registers a CPU exception handler, `[MIN_EXC_VEC, MAX_EXC_VEC]`. Silently
/// overwrites an existing entry: exceptions are wired once, at boot, by the
/// kernel itself.
pub fn register_exception(vector: usize, handler: HandlerFn) -> Result<(), KernelError> {
    if !(MIN_EXC_VEC..=MAX_EXC_VEC).contains(&vector) {
        return Err(KernelError::UnauthorizedInterruptLine);
    }
    TABLE.lock()[vector] = Some(InterruptEntry { enabled: true, handler });
    Ok(())
}

/// Disables local interrupts, returning whether they were enabled before
/// this call so a matching `restore_local_interrupts` can undo only its own
/// nesting level.
pub fn disable_local_interrupts() -> bool {
    let was_enabled = RFlagsReg::interrupts_enabled();
    unsafe { interrupts::disable() };
    NEST_COUNT.fetch_add(1, Ordering::SeqCst);
    was_enabled
}

pub fn restore_local_interrupts(prev_state: bool) {
    let remaining = NEST_COUNT.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining == 0 && prev_state {
        unsafe { interrupts::enable() };
    }
}

pub fn set_irq_mask(irq: u8, enabled: bool) -> Result<(), KernelError> {
    controller::set_mask(irq, enabled)
}

pub fn set_irq_eoi(irq: u8) -> Result<(), KernelError> {
    controller::set_eoi(irq)
}

/// The common dispatcher every trampoline stub calls into. `vector_or_err`
/// doubles as the hardware error code for faulting exceptions and as the
/// vector number for the shared IRQ trampoline, disambiguated by `is_irq`.
fn dispatch(frame: &ExceptionStackFrame, vector: usize, error_code: u64, is_irq: bool) {
    let _guard = InterruptContextGuard::enter();

    let locally_masked = !RFlagsReg::interrupts_enabled();
    let is_privileged =
        vector == vectors::PANIC_INT_LINE || vector == vectors::SCHEDULER_SW_INT_LINE || vector < IRQ_BASE;
    if locally_masked && !is_privileged {
        return;
    }

    if is_irq {
        if let Some(irq) = vectors::vector_to_irq(vector) {
            if controller::classify_spurious(vectors::IRQ_BASE as u8 + irq)
                == controller::SpuriousClass::Spurious
            {
                let _ = controller::set_eoi(irq);
                return;
            }
        }
    }

    let entry = TABLE.lock()[vector];
    match entry {
        Some(e) if e.enabled => (e.handler)(frame, error_code),
        _ => {
            warn!("unregistered interrupt on vector {:#x}, frame {:?}", vector, frame);
            crate::panic::panic_from_exception(vector, frame, error_code);
        }
    }

    if is_irq {
        if let Some(irq) = vectors::vector_to_irq(vector) {
            let _ = controller::set_eoi(irq);
        }
    }
}

fn dispatch_exception_no_error(frame: *mut ExceptionStackFrame, vector: usize) {
    dispatch(unsafe { &*frame }, vector, 0, false);
}

fn dispatch_exception_with_error(frame: *mut ExceptionStackFrame, vector: usize, error_code: u64) {
    dispatch(unsafe { &*frame }, vector, error_code, false);
}

fn dispatch_irq(frame: *mut ExceptionStackFrame, vector: u64) {
    dispatch(unsafe { &*frame }, vector as usize, 0, true);
}

fn page_fault_stub(frame: *mut ExceptionStackFrame, error_code: u64) {
    crate::mm::fault::dispatch(unsafe { &*frame }, PageFaultErrorCode::from_bits_truncate(error_code));
}

macro_rules! define_exception_no_error {
    ($fn_name:ident, $vector:expr) => {
        extern "C" fn $fn_name(frame: *mut ExceptionStackFrame) {
            dispatch_exception_no_error(frame, $vector);
        }
    };
}

macro_rules! define_exception_with_error {
    ($fn_name:ident, $vector:expr) => {
        extern "C" fn $fn_name(frame: *mut ExceptionStackFrame, error_code: u64) {
            dispatch_exception_with_error(frame, $vector, error_code);
        }
    };
}

define_exception_no_error!(divide_error_stub, vectors::DIVIDE_ERROR);
define_exception_no_error!(debug_stub, vectors::DEBUG);
define_exception_no_error!(nmi_stub, vectors::NON_MASKABLE_INTERRUPT);
define_exception_no_error!(breakpoint_stub, vectors::BREAKPOINT);
define_exception_no_error!(overflow_stub, vectors::OVERFLOW);
define_exception_no_error!(bound_range_stub, vectors::BOUND_RANGE_EXCEEDED);
define_exception_no_error!(invalid_opcode_stub, vectors::INVALID_OPCODE);
define_exception_no_error!(device_not_available_stub, vectors::DEVICE_NOT_AVAILABLE);
define_exception_with_error!(double_fault_stub, vectors::DOUBLE_FAULT);
define_exception_with_error!(invalid_tss_stub, vectors::INVALID_TSS);
define_exception_with_error!(segment_not_present_stub, vectors::SEGMENT_NOT_PRESENT);
define_exception_with_error!(stack_segment_fault_stub, vectors::STACK_SEGMENT_FAULT);
define_exception_with_error!(general_protection_fault_stub, vectors::GENERAL_PROTECTION_FAULT);
define_exception_no_error!(x87_floating_point_stub, vectors::X87_FLOATING_POINT);
define_exception_with_error!(alignment_check_stub, vectors::ALIGNMENT_CHECK);
define_exception_no_error!(machine_check_stub, vectors::MACHINE_CHECK);
define_exception_no_error!(simd_floating_point_stub, vectors::SIMD_FLOATING_POINT);

/// Builds the hardware IDT and the parallel software table's exception
/// slots, then loads it. Must run once, before `sti`.
pub fn init() {
    let mut idt = IDT.lock();

    idt.set_handler(vectors::DIVIDE_ERROR, handler_without_error_code!(divide_error_stub));
    idt.set_handler(vectors::DEBUG, handler_without_error_code!(debug_stub));
    idt.set_handler(vectors::NON_MASKABLE_INTERRUPT, handler_without_error_code!(nmi_stub));
    idt.set_handler(vectors::BREAKPOINT, handler_without_error_code!(breakpoint_stub));
    idt.set_handler(vectors::OVERFLOW, handler_without_error_code!(overflow_stub));
    idt.set_handler(vectors::BOUND_RANGE_EXCEEDED, handler_without_error_code!(bound_range_stub));
    idt.set_handler(vectors::INVALID_OPCODE, handler_without_error_code!(invalid_opcode_stub));
    idt.set_handler(vectors::DEVICE_NOT_AVAILABLE, handler_without_error_code!(device_not_available_stub));
    idt.set_handler(vectors::DOUBLE_FAULT, handler_with_error_code!(double_fault_stub))
        .set_interrupt_stack_index(arch_x86_64::tss::DOUBLE_FAULT_IST_IDX as u16);
    idt.set_handler(vectors::INVALID_TSS, handler_with_error_code!(invalid_tss_stub));
    idt.set_handler(vectors::SEGMENT_NOT_PRESENT, handler_with_error_code!(segment_not_present_stub));
    idt.set_handler(vectors::STACK_SEGMENT_FAULT, handler_with_error_code!(stack_segment_fault_stub));
    idt.set_handler(vectors::GENERAL_PROTECTION_FAULT, handler_with_error_code!(general_protection_fault_stub));
    idt.set_handler(vectors::PAGE_FAULT, handler_with_error_code!(page_fault_stub));
    idt.set_handler(vectors::X87_FLOATING_POINT, handler_without_error_code!(x87_floating_point_stub));
    idt.set_handler(vectors::ALIGNMENT_CHECK, handler_with_error_code!(alignment_check_stub));
    idt.set_handler(vectors::MACHINE_CHECK, handler_without_error_code!(machine_check_stub));
    idt.set_handler(vectors::SIMD_FLOATING_POINT, handler_without_error_code!(simd_floating_point_stub));

    // Covers both the legacy IRQ0-15 range and, as a side effect of sharing
    // that range, the software reschedule (0x21) and panic (0x2a) vectors:
    // both ride the same shared IRQ trampoline, distinguished purely by the
    // vector number `dispatch` receives.
    for irq in 0..vectors::IRQ_COUNT as u8 {
        let vector = IRQ_BASE as u8 + irq;
        idt.set_handler(vector as usize, irq_gate(vector));
    }

    let idt_ptr: *const InterruptDescriptorTable = &*idt;
    drop(idt);
    unsafe { (&*idt_ptr).load() };
}

/// One `handler_for_vector!` instantiation per IRQ line. The vector is
/// baked into the generated stub as an immediate; `dispatch_irq` itself is
/// shared across every line.
fn irq_gate(vector: u8) -> arch_x86_64::idt::HandlerFunc {
    match vector {
        0x20 => handler_for_vector!(dispatch_irq, 0x20),
        0x21 => handler_for_vector!(dispatch_irq, 0x21),
        0x22 => handler_for_vector!(dispatch_irq, 0x22),
        0x23 => handler_for_vector!(dispatch_irq, 0x23),
        0x24 => handler_for_vector!(dispatch_irq, 0x24),
        0x25 => handler_for_vector!(dispatch_irq, 0x25),
        0x26 => handler_for_vector!(dispatch_irq, 0x26),
        0x27 => handler_for_vector!(dispatch_irq, 0x27),
        0x28 => handler_for_vector!(dispatch_irq, 0x28),
        0x29 => handler_for_vector!(dispatch_irq, 0x29),
        0x2a => handler_for_vector!(dispatch_irq, 0x2a),
        0x2b => handler_for_vector!(dispatch_irq, 0x2b),
        0x2c => handler_for_vector!(dispatch_irq, 0x2c),
        0x2d => handler_for_vector!(dispatch_irq, 0x2d),
        0x2e => handler_for_vector!(dispatch_irq, 0x2e),
        0x2f => handler_for_vector!(dispatch_irq, 0x2f),
        other => unreachable!("no static IRQ gate for vector {:#x}", other),
    }
}
