use crate::{
    frame_allocator::FrameAllocator,
    instructions,
    memory::{Address, Page, PageSize, PhysicalAddress, PhysicalFrame, Size4KiB, VirtualAddress},
};
use bit_field::BitField;
use bitflags::bitflags;
use core::{
    ops::{Index, IndexMut},
    ptr, slice,
};

pub mod recursive_page_table;

bitflags! {
    /// Flags stored alongside the physical address in a page table entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageTableEntryFlags: u64 {
        const NONE = 0;
        const PRESENT = 1;
        const WRITABLE = 1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const HUGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}

const TABLE_ENTRY_COUNT: usize = 512;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub fn is_present(&self) -> bool {
        (self.0 & PageTableEntryFlags::PRESENT.bits()) != 0
    }

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.get_bits(12..48) << 12)
    }

    pub fn physical_frame(&self) -> PhysicalFrame {
        PhysicalFrame::containing_address(self.address())
    }

    pub fn set_address(&mut self, addr: PhysicalAddress, flags: PageTableEntryFlags) {
        self.0 = addr.as_u64() | flags.bits();
    }

    pub fn flags(&self) -> PageTableEntryFlags {
        PageTableEntryFlags::from_bits_truncate(self.0)
    }

    pub fn add_flags(&mut self, flags: PageTableEntryFlags) {
        self.0 |= flags.bits();
    }

    pub fn set_unused(&mut self) {
        self.0 = 0;
    }
}

#[repr(align(4096))]
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PageTable {
    entries: [PageTableEntry; TABLE_ENTRY_COUNT],
}

impl PageTable {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn empty() -> Self {
        Self {
            entries: [PageTableEntry(0); TABLE_ENTRY_COUNT],
        }
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, PageTableEntry> {
        self.entries.iter_mut()
    }

    /// # Safety
    ///
    /// `address` must point to a 4096-byte-aligned, exclusively owned frame.
    pub unsafe fn initialize_empty_at_address(address: VirtualAddress) -> &'static mut PageTable {
        assert!(
            address.as_u64() as usize % PageTable::SIZE == 0,
            "page table address must be page aligned"
        );
        unsafe {
            ptr::write(address.as_mut_ptr(), PageTable::empty());
            &mut *address.as_mut_ptr()
        }
    }

    /// # Safety
    ///
    /// `address` must already hold a valid, initialized page table.
    pub unsafe fn at_address(address: VirtualAddress) -> &'static mut PageTable {
        unsafe { &mut *address.as_mut_ptr() }
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    FrameAllocationFailed,
    PageAlreadyMapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappingError {
    PageNotMapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationError {
    NotMapped,
}

pub trait Mapper<S: PageSize> {
    fn map_to<A>(
        &mut self,
        frame: PhysicalFrame<S>,
        page: Page<S>,
        flags: PageTableEntryFlags,
        frame_allocator: &mut A,
    ) -> Result<TlbFlusher<S>, MappingError>
    where
        A: FrameAllocator<Size4KiB>;

    fn identity_map<A>(
        &mut self,
        frame: PhysicalFrame<S>,
        flags: PageTableEntryFlags,
        frame_allocator: &mut A,
    ) -> Result<TlbFlusher<S>, MappingError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let page = Page::containing_address(VirtualAddress::new(frame.address.as_u64()));
        self.map_to(frame, page, flags, frame_allocator)
    }

    fn unmap(&mut self, page: Page<S>)
        -> Result<(PhysicalFrame<S>, TlbFlusher<S>), UnmappingError>;
}

/// Translates a page to the physical frame currently backing it.
pub trait Translator<S: PageSize> {
    fn translate(
        &self,
        page: Page<S>,
    ) -> Result<(PhysicalFrame<S>, PageTableEntryFlags), TranslationError>;
}

#[must_use = "a page table change must be flushed from the TLB or explicitly ignored"]
pub struct TlbFlusher<S: PageSize>(Page<S>);

impl<S: PageSize> TlbFlusher<S> {
    pub fn new(page: Page<S>) -> Self {
        TlbFlusher(page)
    }

    pub fn flush(self) {
        instructions::flush_tlb(self.0.address())
    }

    pub fn ignore(self) {}
}
