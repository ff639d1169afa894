//! Global Descriptor Table definitions.
use bit_field::BitField;
use bitflags::bitflags;
use core::arch::asm;
use core::ptr;

use crate::memory::VirtualAddress;
use crate::tss::TaskStateSegment;
use crate::PrivilegeLevel;

/// An index into the GDT plus the requested privilege level, loaded into a
/// segment register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SegmentSelector(u16);

impl SegmentSelector {
    pub fn new(index: u16, rpl: PrivilegeLevel) -> Self {
        SegmentSelector((index << 3) | rpl as u16)
    }

    pub const fn new_raw(raw: u16) -> Self {
        SegmentSelector(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl From<u16> for SegmentSelector {
    fn from(value: u16) -> Self {
        SegmentSelector(value)
    }
}

bitflags! {
    /// Combines the access byte and flags of a segment descriptor.
    #[derive(Clone, Copy)]
    pub struct SegmentDescriptorFlags: u64 {
        const ACCESSED = 1 << 40;
        const READ_WRITE = 1 << 41;
        const CONFORMING = 1 << 42;
        const EXECUTABLE = 1 << 43;
        const USER_SEGMENT = 1 << 44;
        const PRESENT = 1 << 47;
        const LONG_MODE = 1 << 53;
        const PROTECTED_MODE = 1 << 54;
        const GRANULARITY = 1 << 55;
    }
}

pub struct SegmentDescriptor(u64);

impl SegmentDescriptor {
    pub fn new(flags: SegmentDescriptorFlags, limit: u32, base: u32) -> SegmentDescriptor {
        let limit_low = limit & 0xFFFF;
        let limit_high = (limit >> 16) & 0b1111;
        let base_low = base & 0xFFFFFF;
        let base_high = (base >> 24) & 0xFF;

        let mut desc = flags.bits();

        if base != 0 {
            desc.set_bits(16..=39, base_low.into());
            desc.set_bits(56..=63, base_high.into());
        }

        desc.set_bits(0..=15, limit_low.into());
        desc.set_bits(48..=51, limit_high.into());

        SegmentDescriptor(desc)
    }

    pub fn kernel_code_segment() -> SegmentDescriptor {
        let flags = SegmentDescriptorFlags::READ_WRITE
            | SegmentDescriptorFlags::EXECUTABLE
            | SegmentDescriptorFlags::PRESENT
            | SegmentDescriptorFlags::USER_SEGMENT
            | SegmentDescriptorFlags::LONG_MODE
            | SegmentDescriptorFlags::ACCESSED;

        SegmentDescriptor::new(flags, 0, 0)
    }

    pub fn kernel_data_segment() -> SegmentDescriptor {
        let flags = SegmentDescriptorFlags::READ_WRITE
            | SegmentDescriptorFlags::PRESENT
            | SegmentDescriptorFlags::USER_SEGMENT
            | SegmentDescriptorFlags::ACCESSED;

        SegmentDescriptor::new(flags, 0, 0)
    }
}

const GLOBAL_DESCRIPTOR_TABLE_ENTRY_COUNT: usize = 8;

#[derive(Debug)]
#[repr(C)]
pub struct GlobalDescriptorTable {
    entries: [u64; GLOBAL_DESCRIPTOR_TABLE_ENTRY_COUNT],
    size: usize,
}

impl GlobalDescriptorTable {
    pub const fn new() -> GlobalDescriptorTable {
        GlobalDescriptorTable {
            entries: [0x0; GLOBAL_DESCRIPTOR_TABLE_ENTRY_COUNT],
            size: 1,
        }
    }

    pub fn initialize_at_address(address: VirtualAddress) -> &'static mut GlobalDescriptorTable {
        let gdt_ptr: *mut GlobalDescriptorTable = address.as_mut_ptr();
        unsafe {
            ptr::write(gdt_ptr, Self::new());
            &mut *gdt_ptr
        }
    }

    pub fn add_entry(&mut self, entry: SegmentDescriptor) -> SegmentSelector {
        let idx = self.push(entry.0);
        SegmentSelector::new(idx as u16, PrivilegeLevel::Ring0)
    }

    /// A TSS descriptor is 128 bits wide in long mode and occupies two
    /// consecutive GDT slots.
    pub fn add_tss(&mut self, tss: &'static TaskStateSegment) -> SegmentSelector {
        let base = tss as *const _ as u64;
        let limit = (core::mem::size_of::<TaskStateSegment>() - 1) as u32;

        let flags = SegmentDescriptorFlags::PRESENT | SegmentDescriptorFlags::ACCESSED;
        let mut low = flags.bits();
        low.set_bits(0..=15, (limit & 0xFFFF) as u64);
        low.set_bits(16..=39, base.get_bits(0..=23));
        low.set_bits(40..=43, 0b1001); // 64-bit available TSS type
        low.set_bits(56..=63, base.get_bits(24..=31));

        let high = base.get_bits(32..=63);

        let idx = self.push(low);
        self.push(high);
        SegmentSelector::new(idx as u16, PrivilegeLevel::Ring0)
    }

    fn push(&mut self, value: u64) -> usize {
        if self.size < self.entries.len() {
            let idx = self.size;
            self.entries[idx] = value;
            self.size += 1;
            idx
        } else {
            panic!("GDT full");
        }
    }

    pub fn load(&'static self) {
        let desc = GlobalDescriptorTableDescriptor::new(self);
        unsafe {
            asm!("lgdt [{}]", in(reg) &desc, options(readonly, nostack, preserves_flags));
        }
    }
}

#[repr(C, packed(2))]
struct GlobalDescriptorTableDescriptor {
    size: u16,
    base: *const GlobalDescriptorTable,
}

impl GlobalDescriptorTableDescriptor {
    fn new(table: &GlobalDescriptorTable) -> GlobalDescriptorTableDescriptor {
        GlobalDescriptorTableDescriptor {
            size: (table.size * 8 - 1) as u16,
            base: table,
        }
    }
}
