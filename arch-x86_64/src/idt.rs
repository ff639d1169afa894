//! The x86 interrupt descriptor table: a dense, 256-entry array indexed
//! directly by interrupt vector.
use crate::{gdt::SegmentSelector, register::CS, PrivilegeLevel};
use bit_field::BitField;
use core::{arch::asm, mem::size_of};
use util::const_assert;

pub const VECTOR_COUNT: usize = 256;

pub const DIVIDE_ERROR: usize = 0;
pub const DEBUG: usize = 1;
pub const NON_MASKABLE_INTERRUPT: usize = 2;
pub const BREAKPOINT: usize = 3;
pub const OVERFLOW: usize = 4;
pub const BOUND_RANGE_EXCEEDED: usize = 5;
pub const INVALID_OPCODE: usize = 6;
pub const DEVICE_NOT_AVAILABLE: usize = 7;
pub const DOUBLE_FAULT: usize = 8;
pub const INVALID_TSS: usize = 10;
pub const SEGMENT_NOT_PRESENT: usize = 11;
pub const STACK_SEGMENT_FAULT: usize = 12;
pub const GENERAL_PROTECTION_FAULT: usize = 13;
pub const PAGE_FAULT: usize = 14;
pub const X87_FLOATING_POINT: usize = 16;
pub const ALIGNMENT_CHECK: usize = 17;
pub const MACHINE_CHECK: usize = 18;
pub const SIMD_FLOATING_POINT: usize = 19;

#[derive(Debug, Clone, Copy)]
pub struct InterruptDescriptorOptions(u16);

impl Default for InterruptDescriptorOptions {
    fn default() -> Self {
        const INTERRUPT_GATE_ID: u16 = 0xe;
        let mut options = 0;
        options.set_bits(8..=11, INTERRUPT_GATE_ID);
        InterruptDescriptorOptions(options)
    }
}

impl InterruptDescriptorOptions {
    pub fn set_present(&mut self, present: bool) -> &mut Self {
        self.0.set_bit(15, present);
        self
    }

    pub fn set_privilege_level(&mut self, level: PrivilegeLevel) -> &mut Self {
        self.0.set_bits(13..=14, level as u16);
        self
    }

    /// Sets the Interrupt Stack Table index this gate switches to, 0 meaning
    /// "don't switch stacks".
    pub fn set_interrupt_stack_index(&mut self, index: u16) -> &mut Self {
        self.0.set_bits(0..=2, index + 1);
        self
    }
}

pub type HandlerFunc = extern "C" fn() -> !;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptDescriptor {
    pointer_low: u16,
    segment_selector: SegmentSelector,
    options: InterruptDescriptorOptions,
    pointer_middle: u16,
    pointer_high: u32,
    reserved: u32,
}

impl InterruptDescriptor {
    pub const fn missing() -> Self {
        Self {
            pointer_low: 0,
            segment_selector: SegmentSelector::new_raw(0),
            options: InterruptDescriptorOptions(0x0E00),
            pointer_middle: 0,
            pointer_high: 0,
            reserved: 0,
        }
    }

    pub fn set_handler_function(&mut self, handler: HandlerFunc) -> &mut InterruptDescriptorOptions {
        let handler_address = handler as u64;
        self.pointer_low = handler_address as u16;
        self.pointer_middle = (handler_address >> 16) as u16;
        self.pointer_high = (handler_address >> 32) as u32;
        self.segment_selector = CS::read().into();
        self.options.set_present(true);
        &mut self.options
    }
}

#[repr(C, packed)]
struct InterruptTableDescriptor {
    size: u16,
    base: u64,
}

#[repr(C, align(16))]
pub struct InterruptDescriptorTable {
    entries: [InterruptDescriptor; VECTOR_COUNT],
}

const_assert!(size_of::<InterruptDescriptorTable>() == VECTOR_COUNT * 0x10);

impl InterruptDescriptorTable {
    pub const fn new() -> Self {
        Self {
            entries: [InterruptDescriptor::missing(); VECTOR_COUNT],
        }
    }

    pub fn set_handler(&mut self, vector: usize, handler: HandlerFunc) -> &mut InterruptDescriptorOptions {
        self.entries[vector].set_handler_function(handler)
    }

    /// # Safety
    ///
    /// `self` must live for the remainder of the kernel's execution: the
    /// CPU will dereference `self`'s address on every interrupt from here
    /// on.
    pub unsafe fn load(&'static self) {
        let desc = InterruptTableDescriptor {
            size: (size_of::<Self>() - 1) as u16,
            base: self as *const _ as u64,
        };
        unsafe {
            asm!("lidt [{}]", in(reg) &desc, options(readonly, nostack, preserves_flags));
        }
    }
}

impl Default for InterruptDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
