//! Kernel panic path: register dump and recursive-panic guard, format
//! modeled on the original's boxed CPU-state printout.
use core::sync::atomic::{AtomicBool, Ordering};

use arch_x86_64::instructions::hlt;
use arch_x86_64::interrupts::ExceptionStackFrame;
use arch_x86_64::register::{Cr0, Cr2, Cr3};

use crate::interrupts::vectors;
use crate::serial_println;

static PANIC_ACTIVE: AtomicBool = AtomicBool::new(false);

fn reason(vector: usize) -> &'static str {
    match vector {
        vectors::DIVIDE_ERROR => "Division by zero",
        vectors::DEBUG => "Single-step interrupt",
        vectors::NON_MASKABLE_INTERRUPT => "Non maskable interrupt",
        vectors::BREAKPOINT => "Breakpoint",
        vectors::OVERFLOW => "Overflow",
        vectors::BOUND_RANGE_EXCEEDED => "Bounds",
        vectors::INVALID_OPCODE => "Invalid opcode",
        vectors::DEVICE_NOT_AVAILABLE => "Coprocessor not available",
        vectors::DOUBLE_FAULT => "Double fault",
        vectors::INVALID_TSS => "Invalid task state segment",
        vectors::SEGMENT_NOT_PRESENT => "Segment not present",
        vectors::STACK_SEGMENT_FAULT => "Stack fault",
        vectors::GENERAL_PROTECTION_FAULT => "General protection fault",
        vectors::PAGE_FAULT => "Page fault",
        vectors::X87_FLOATING_POINT => "Math fault",
        vectors::ALIGNMENT_CHECK => "Alignment check",
        vectors::MACHINE_CHECK => "Machine check",
        vectors::SIMD_FLOATING_POINT => "SIMD floating-point exception",
        v if v == vectors::PANIC_INT_LINE => "Panic generated by the kernel",
        _ => "Unknown",
    }
}

/// Called by the dispatcher (and, directly, by C4 on an unhandled page
/// fault) for any exception with no registered handler. Never returns.
pub fn panic_from_exception(vector: usize, frame: &ExceptionStackFrame, error_code: u64) -> ! {
    // A second CPU (or a re-entrant fault on this one) hitting this path
    // after the screen is already up just halts -- the first panic already
    // printed everything there is to say.
    if PANIC_ACTIVE.swap(true, Ordering::SeqCst) {
        loop {
            unsafe { arch_x86_64::interrupts::disable() };
            hlt();
        }
    }

    unsafe { arch_x86_64::interrupts::disable() };

    serial_println!();
    serial_println!("#===================== KERNEL PANIC =====================#");
    serial_println!("| Reason: {}", reason(vector));
    serial_println!("| INT ID: {:#04x}  Error code: {:#010x}", vector, error_code);
    serial_println!("|---------------------------------------------------------|");
    serial_println!(
        "| IP: {:#018x}  CS: {:#06x}  FLAGS: {:#018x}",
        frame.instruction_pointer, frame.code_segment, frame.cpu_flags
    );
    serial_println!("| SP: {:#018x}  SS: {:#06x}", frame.stack_pointer, frame.stack_segment);
    serial_println!(
        "| CR0: {:#010x}  CR2: {:#018x}  CR3: {:#010x}",
        Cr0::read_raw(),
        Cr2::read_raw(),
        Cr3::read_raw()
    );
    serial_println!(
        "| core: {}  thread: {:?}",
        CORE_ID,
        crate::sched::current_tid()
    );
    serial_println!("#==========================================================#");

    crate::interrupts::controller::broadcast_panic_ipi(vectors::PANIC_INT_LINE as u8);

    loop {
        hlt();
    }
}

/// Fixed: SMP bring-up beyond idling APs is out of scope, so this build
/// only ever has one CPU actually scheduling threads.
const CORE_ID: u8 = 0;

/// A kernel-initiated panic (an `assert!`/`Result::expect` failure, or the
/// Rust `#[panic_handler]`) with no CPU-pushed frame to show; it still goes
/// through the same recursive-panic guard and serial sink.
pub fn panic_from_message(args: core::fmt::Arguments) -> ! {
    if PANIC_ACTIVE.swap(true, Ordering::SeqCst) {
        loop {
            unsafe { arch_x86_64::interrupts::disable() };
            hlt();
        }
    }
    unsafe { arch_x86_64::interrupts::disable() };
    serial_println!();
    serial_println!("#===================== KERNEL PANIC =====================#");
    serial_println!("| {}", args);
    serial_println!("#==========================================================#");
    loop {
        hlt();
    }
}
