//! Helpers for reading/writing the handful of control and flag registers
//! the kernel core actually needs.
use crate::{
    gdt::SegmentSelector,
    memory::{Address, PhysicalAddress, PhysicalFrame, VirtualAddress},
};
use bitflags::bitflags;
use core::arch::asm;

bitflags! {
    /// All bit patterns are valid representations of RFLAGS.
    #[repr(transparent)]
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct RFlags: u64 {
        const ALIGNMENT_CHECK = 1 << 18;
        const OVERFLOW_FLAG = 1 << 11;
        const DIRECTION_FLAG = 1 << 10;
        const INTERRUPT_FLAG = 1 << 9;
        const TRAP_FLAG = 1 << 8;
        const SIGN_FLAG = 1 << 7;
        const ZERO_FLAG = 1 << 6;
        const AUXILIARY_CARRY_FLAG = 1 << 4;
        const PARITY_FLAG = 1 << 2;
        const CARRY_FLAG = 1;
    }
}

pub struct RFlagsReg;

impl RFlagsReg {
    pub fn read() -> RFlags {
        RFlags::from_bits_truncate(Self::read_raw())
    }

    pub fn read_raw() -> u64 {
        let val: u64;
        unsafe {
            asm!("pushfq; pop {}", out(reg) val, options(nomem, preserves_flags));
        }
        val
    }

    /// Whether the interrupt flag is currently set, i.e. maskable interrupts
    /// are enabled on this CPU.
    pub fn interrupts_enabled() -> bool {
        Self::read().contains(RFlags::INTERRUPT_FLAG)
    }
}

/// Model specific register access. Only used for the small set of MSRs the
/// kernel reads directly (the local APIC base).
pub struct Msr;

impl Msr {
    pub fn read(num: u32) -> u64 {
        let (high, low): (u32, u32);
        unsafe {
            asm!(
                "rdmsr",
                in("ecx") num,
                out("eax") low, out("edx") high,
                options(nomem, nostack, preserves_flags),
            );
        }
        ((high as u64) << 32) | (low as u64)
    }

    pub fn write(num: u32, val: u64) {
        let high = (val >> 32) as u32;
        let low = val as u32;
        unsafe {
            asm!(
                "wrmsr",
                in("ecx") num,
                in("eax") low,
                in("edx") high,
                options(nomem, nostack, preserves_flags),
            );
        }
    }
}

bitflags! {
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct Cr0Flags: u64 {
        const PROTECTED_MODE_ENABLE = 1;
        const WRITE_PROTECT = 1 << 16;
        const PAGING = 1 << 31;
    }
}

#[derive(Debug)]
pub struct Cr0;

impl Cr0 {
    pub fn read_raw() -> u64 {
        let cr0: u64;
        unsafe {
            asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        cr0
    }

    pub fn read() -> Cr0Flags {
        Cr0Flags::from_bits_truncate(Self::read_raw())
    }
}

#[derive(Debug)]
pub struct Cr2;

impl Cr2 {
    pub fn read_raw() -> u64 {
        let cr2: u64;
        unsafe {
            asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        cr2
    }

    /// The faulting address recorded by the CPU on the last page fault.
    pub fn read() -> VirtualAddress {
        VirtualAddress::new(Self::read_raw())
    }
}

bitflags! {
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct Cr3Flags: u64 {
        const PAGE_LEVEL_WRITETHROUGH = 1 << 3;
        const PAGE_LEVEL_CACHE_DISABLE = 1 << 4;
    }
}

#[derive(Debug)]
pub struct Cr3;

impl Cr3 {
    pub fn read_raw() -> u64 {
        let cr3: u64;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        cr3
    }

    /// Reads the physical frame backing the top-level page table and the
    /// cache-control flags alongside it.
    pub fn read() -> (PhysicalFrame, Cr3Flags) {
        let raw = Self::read_raw();
        let frame =
            PhysicalFrame::containing_address(PhysicalAddress::new(raw & 0x_000f_ffff_ffff_f000));
        let flags = Cr3Flags::from_bits_truncate(raw & 0xfff);
        (frame, flags)
    }

    /// Switches to a new top-level page table.
    ///
    /// # Safety
    ///
    /// The new table must map the currently executing code and stack, or
    /// the CPU will fault on the very next instruction.
    pub unsafe fn write(frame: PhysicalFrame, flags: Cr3Flags) {
        unsafe { Self::write_raw(frame.start() | flags.bits()) }
    }

    /// # Safety
    ///
    /// See [`Cr3::write`].
    pub unsafe fn write_raw(val: u64) {
        unsafe { asm!("mov cr3, {}", in(reg) val, options(nostack, preserves_flags)) };
    }
}

#[derive(Debug)]
pub struct CS;

impl CS {
    pub fn read() -> u16 {
        let cs: u16;
        unsafe { asm!("mov {:x}, cs", out(reg) cs, options(nostack, nomem, preserves_flags)) };
        cs
    }

    /// There is no `mov cs, ...`; reloading it takes a far return to a
    /// label right after the push.
    ///
    /// # Safety
    ///
    /// `val` must name a valid, present 64-bit code segment descriptor.
    pub unsafe fn write(val: SegmentSelector) {
        unsafe {
            asm!(
                "push {sel}",
                "lea {tmp}, [2f + rip]",
                "push {tmp}",
                "retfq",
                "2:",
                sel = in(reg) val.raw() as usize,
                tmp = lateout(reg) _,
                options(preserves_flags),
            );
        }
    }
}

#[derive(Debug)]
pub struct SS;

impl SS {
    pub fn read() -> u16 {
        let ss: u16;
        unsafe { asm!("mov {:x}, ss", out(reg) ss, options(nostack, nomem, preserves_flags)) };
        ss
    }

    /// # Safety
    ///
    /// `val` must name a valid, present data segment descriptor.
    pub unsafe fn write(val: SegmentSelector) {
        unsafe {
            asm!("mov ss, {:x}", in(reg) val.raw(), options(nostack, nomem, preserves_flags));
        }
    }
}

#[derive(Debug)]
pub struct DS;

impl DS {
    pub fn read() -> u16 {
        let ds: u16;
        unsafe { asm!("mov {:x}, ds", out(reg) ds, options(nostack, nomem, preserves_flags)) };
        ds
    }

    /// # Safety
    ///
    /// `val` must name a valid, present data segment descriptor.
    pub unsafe fn write(val: SegmentSelector) {
        unsafe {
            asm!("mov ds, {:x}", in(reg) val.raw(), options(nostack, nomem, preserves_flags));
        }
    }
}

#[derive(Debug)]
pub struct ES;

impl ES {
    pub fn read() -> u16 {
        let es: u16;
        unsafe { asm!("mov {:x}, es", out(reg) es, options(nostack, nomem, preserves_flags)) };
        es
    }

    /// # Safety
    ///
    /// `val` must name a valid, present data segment descriptor.
    pub unsafe fn write(val: SegmentSelector) {
        unsafe {
            asm!("mov es, {:x}", in(reg) val.raw(), options(nostack, nomem, preserves_flags));
        }
    }
}
