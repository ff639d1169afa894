//! Low-level entry stubs for CPU exceptions and hardware interrupts.
//!
//! Every vector enters through a small `#[naked]` wrapper that saves the
//! scratch (caller-saved) registers, builds a C-ABI-compatible frame and
//! calls into safe Rust. Callee-saved registers don't need saving here:
//! the compiler already guarantees our handler functions won't clobber
//! them.
use bitflags::bitflags;
use core::{arch::asm, fmt};

#[macro_export]
macro_rules! push_scratch_registers {
    () => {
        "push rax; push rcx; push rdx; push rsi; push rdi; push r8; push r9; push r10; push r11"
    };
}

#[macro_export]
macro_rules! pop_scratch_registers {
    () => {
        "pop r11; pop r10; pop r9; pop r8; pop rdi; pop rsi; pop rdx; pop rcx; pop rax"
    };
}

/// Wraps an exception handler that receives a hardware-pushed error code.
///
/// Stack layout at the point of `call`: 5 iret registers + 9 scratch
/// registers + 1 error code = 15 qwords, one short of 16-byte alignment, so
/// we push a padding qword before `call`.
#[macro_export]
macro_rules! handler_with_error_code {
    ($name:ident) => {{
        #[unsafe(naked)]
        extern "C" fn wrapper() -> ! {
            core::arch::naked_asm!(
                $crate::push_scratch_registers!(),
                "mov rsi, [rsp + 9*8]",
                "mov rdi, rsp",
                "add rdi, 10*8",
                "sub rsp, 8",
                "call {}",
                "add rsp, 8",
                $crate::pop_scratch_registers!(),
                "add rsp, 8",
                "iretq",
                sym $name,
            )
        }
        wrapper
    }};
}

/// Wraps an exception handler with no hardware error code. 5 iret registers
/// + 9 scratch registers = 14 qwords -- already aligned, nothing to pad.
#[macro_export]
macro_rules! handler_without_error_code {
    ($name:ident) => {{
        #[unsafe(naked)]
        extern "C" fn wrapper() -> ! {
            core::arch::naked_asm!(
                $crate::push_scratch_registers!(),
                "mov rdi, rsp",
                "add rdi, 9*8",
                "call {}",
                $crate::pop_scratch_registers!(),
                "iretq",
                sym $name,
            )
        }
        wrapper
    }};
}

/// Wraps a hardware interrupt handler, pushing the vector number as a fake
/// "error code" so it reaches the common dispatcher alongside the frame.
#[macro_export]
macro_rules! handler_for_vector {
    ($name:ident, $vector:expr) => {{
        #[unsafe(naked)]
        extern "C" fn wrapper() -> ! {
            core::arch::naked_asm!(
                $crate::push_scratch_registers!(),
                "mov rsi, {vector}",
                "mov rdi, rsp",
                "add rdi, 9*8",
                "call {handler}",
                $crate::pop_scratch_registers!(),
                "iretq",
                vector = const $vector,
                handler = sym $name,
            )
        }
        wrapper
    }};
}

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct PageFaultErrorCode: u64 {
        const PROTECTION_VIOLATION = 1 << 0;
        const WRITE_VIOLATION = 1 << 1;
        const USER_MODE = 1 << 2;
        const MALFORMED_TABLE = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// What the CPU pushes onto the stack before jumping to a handler.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExceptionStackFrame {
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub cpu_flags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
}

impl fmt::Debug for ExceptionStackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ExceptionStackFrame {{")?;
        writeln!(f, "    IP: {:#016x}", self.instruction_pointer)?;
        writeln!(f, "    CS: {:#016x}", self.code_segment)?;
        writeln!(f, "    FLAGS: {:#016x}", self.cpu_flags)?;
        writeln!(f, "    SP: {:#016x}", self.stack_pointer)?;
        writeln!(f, "    SS: {:#016x}", self.stack_segment)?;
        write!(f, "}}")
    }
}

/// # Safety
///
/// Disabling interrupts while holding a lock that an interrupt handler also
/// wants to take is fine; disabling them forever is not.
pub unsafe fn disable() {
    unsafe { asm!("cli", options(nostack, preserves_flags)) }
}

/// # Safety
///
/// The caller must not re-enable interrupts while an invariant that
/// assumes them disabled is still being established.
pub unsafe fn enable() {
    unsafe { asm!("sti", options(nostack, preserves_flags)) }
}

pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let was_enabled = crate::register::RFlagsReg::interrupts_enabled();
    unsafe { disable() };
    let ret = f();
    if was_enabled {
        unsafe { enable() };
    }
    ret
}
