//! A page-table mapper built on x86_64 recursive self-mapping instead of a
//! physical-memory offset window.
//!
//! One PML4 entry (`RECURSIVE_INDEX`) points back at the PML4 table itself.
//! Walking the hardware page-table hierarchy through that entry N times
//! before resolving the final translation lets the CPU's own page-table
//! walker hand back the virtual address of any page-table frame, without
//! the kernel needing a separate "all physical memory is mapped here"
//! window. The price is that every intermediate table's virtual address
//! has to be derived from the *indices of the page being mapped*, not from
//! the table's physical address alone -- which is why this type does not
//! go through the generic `PageTableFrameMapping` seam: that seam only
//! hands back a frame, with no index context to reconstruct a recursive
//! address from.
use crate::{
    frame_allocator::FrameAllocator,
    memory::{
        Address, Page, PageSize, PhysicalFrame, Size4KiB, VirtualAddress, RECURSIVE_INDEX,
    },
    paging::{
        Mapper, MappingError, PageTable, PageTableEntryFlags, TlbFlusher, TranslationError,
        Translator, UnmappingError,
    },
};

const PARENT_FLAGS: PageTableEntryFlags = PageTableEntryFlags::from_bits_truncate(
    PageTableEntryFlags::PRESENT.bits()
        | PageTableEntryFlags::WRITABLE.bits()
        | PageTableEntryFlags::USER_ACCESSIBLE.bits(),
);

pub struct RecursivePageTable {
    pml4t_frame: PhysicalFrame<Size4KiB>,
}

impl RecursivePageTable {
    /// # Safety
    ///
    /// `pml4t_frame` must be the frame currently loaded in CR3, and its
    /// `RECURSIVE_INDEX`'th entry must already point back at itself with
    /// `PRESENT | WRITABLE` set.
    pub unsafe fn new(pml4t_frame: PhysicalFrame<Size4KiB>) -> Self {
        Self { pml4t_frame }
    }

    /// Installs the recursive entry into a freshly allocated, otherwise
    /// empty PML4 table and returns a mapper for it.
    ///
    /// # Safety
    ///
    /// `pml4t` must be a valid, currently-unused page table that will be (or
    /// already is) the table loaded through `pml4t_frame`.
    pub unsafe fn init(pml4t: &mut PageTable, pml4t_frame: PhysicalFrame<Size4KiB>) -> Self {
        pml4t[RECURSIVE_INDEX as usize].set_address(pml4t_frame.address, PARENT_FLAGS);
        Self { pml4t_frame }
    }

    fn pml4t(&self) -> &'static mut PageTable {
        let addr = VirtualAddress::from_indices(
            RECURSIVE_INDEX as usize,
            RECURSIVE_INDEX as usize,
            RECURSIVE_INDEX as usize,
            RECURSIVE_INDEX as usize,
            0,
        );
        unsafe { PageTable::at_address(addr) }
    }

    fn l3_addr(l4: usize) -> VirtualAddress {
        VirtualAddress::from_indices(
            RECURSIVE_INDEX as usize,
            RECURSIVE_INDEX as usize,
            RECURSIVE_INDEX as usize,
            l4,
            0,
        )
    }

    fn l2_addr(l4: usize, l3: usize) -> VirtualAddress {
        VirtualAddress::from_indices(RECURSIVE_INDEX as usize, RECURSIVE_INDEX as usize, l4, l3, 0)
    }

    fn l1_addr(l4: usize, l3: usize, l2: usize) -> VirtualAddress {
        VirtualAddress::from_indices(RECURSIVE_INDEX as usize, l4, l3, l2, 0)
    }

    /// Ensures `pml4t[l4]` points at an (empty, if newly created) L3 table.
    fn ensure_l3_table<A>(
        pml4t: &mut PageTable,
        l4: usize,
        allocator: &mut A,
    ) -> Result<(), MappingError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let entry = &mut pml4t[l4];
        if entry.is_unused() {
            let frame = allocator
                .allocate_frame()
                .ok_or(MappingError::FrameAllocationFailed)?;
            entry.set_address(frame.address, PARENT_FLAGS);
            unsafe {
                PageTable::initialize_empty_at_address(Self::l3_addr(l4));
            }
        } else if !entry.flags().contains(PARENT_FLAGS) {
            entry.add_flags(PARENT_FLAGS);
        }
        Ok(())
    }
}

impl Mapper<Size4KiB> for RecursivePageTable {
    fn map_to<A>(
        &mut self,
        frame: PhysicalFrame<Size4KiB>,
        page: Page<Size4KiB>,
        flags: PageTableEntryFlags,
        frame_allocator: &mut A,
    ) -> Result<TlbFlusher<Size4KiB>, MappingError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let addr = page.address();
        let (l4, l3, l2, l1) = (
            addr.l4_index(),
            addr.l3_index(),
            addr.l2_index(),
            addr.l1_index(),
        );

        let pml4t = self.pml4t();
        Self::ensure_l3_table(pml4t, l4, frame_allocator)?;

        let l3_table = unsafe { PageTable::at_address(Self::l3_addr(l4)) };
        {
            let entry = &mut l3_table[l3];
            if entry.is_unused() {
                let l2_frame = frame_allocator
                    .allocate_frame()
                    .ok_or(MappingError::FrameAllocationFailed)?;
                entry.set_address(l2_frame.address, PARENT_FLAGS);
                unsafe {
                    PageTable::initialize_empty_at_address(Self::l2_addr(l4, l3));
                }
            } else if !entry.flags().contains(PARENT_FLAGS) {
                entry.add_flags(PARENT_FLAGS);
            }
        }

        let l2_table = unsafe { PageTable::at_address(Self::l2_addr(l4, l3)) };
        {
            let entry = &mut l2_table[l2];
            if entry.is_unused() {
                let l1_frame = frame_allocator
                    .allocate_frame()
                    .ok_or(MappingError::FrameAllocationFailed)?;
                entry.set_address(l1_frame.address, PARENT_FLAGS);
                unsafe {
                    PageTable::initialize_empty_at_address(Self::l1_addr(l4, l3, l2));
                }
            } else if !entry.flags().contains(PARENT_FLAGS) {
                entry.add_flags(PARENT_FLAGS);
            }
        }

        let l1_table = unsafe { PageTable::at_address(Self::l1_addr(l4, l3, l2)) };
        let pte = &mut l1_table[l1];
        if pte.is_present() {
            return Err(MappingError::PageAlreadyMapped);
        }
        pte.set_address(frame.address, flags);
        Ok(TlbFlusher::new(page))
    }

    fn unmap(
        &mut self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, TlbFlusher<Size4KiB>), UnmappingError> {
        let addr = page.address();
        let (l4, l3, l2, l1) = (
            addr.l4_index(),
            addr.l3_index(),
            addr.l2_index(),
            addr.l1_index(),
        );

        if self.pml4t()[l4].is_unused() {
            return Err(UnmappingError::PageNotMapped);
        }
        let l3_table = unsafe { PageTable::at_address(Self::l3_addr(l4)) };
        if l3_table[l3].is_unused() {
            return Err(UnmappingError::PageNotMapped);
        }
        let l2_table = unsafe { PageTable::at_address(Self::l2_addr(l4, l3)) };
        if l2_table[l2].is_unused() {
            return Err(UnmappingError::PageNotMapped);
        }
        let l1_table = unsafe { PageTable::at_address(Self::l1_addr(l4, l3, l2)) };
        let pte = &mut l1_table[l1];
        if !pte.is_present() {
            return Err(UnmappingError::PageNotMapped);
        }

        let frame = pte.physical_frame();
        pte.set_unused();
        Ok((frame, TlbFlusher::new(page)))
    }
}

impl Translator<Size4KiB> for RecursivePageTable {
    fn translate(
        &self,
        page: Page<Size4KiB>,
    ) -> Result<(PhysicalFrame<Size4KiB>, PageTableEntryFlags), TranslationError> {
        let addr = page.address();
        let (l4, l3, l2, l1) = (
            addr.l4_index(),
            addr.l3_index(),
            addr.l2_index(),
            addr.l1_index(),
        );

        if self.pml4t()[l4].is_unused() {
            return Err(TranslationError::NotMapped);
        }
        let l3_table = unsafe { PageTable::at_address(Self::l3_addr(l4)) };
        if l3_table[l3].is_unused() {
            return Err(TranslationError::NotMapped);
        }
        let l2_table = unsafe { PageTable::at_address(Self::l2_addr(l4, l3)) };
        if l2_table[l2].is_unused() {
            return Err(TranslationError::NotMapped);
        }
        let l1_table = unsafe { PageTable::at_address(Self::l1_addr(l4, l3, l2)) };
        let pte = &l1_table[l1];
        if pte.is_present() {
            Ok((pte.physical_frame(), pte.flags()))
        } else {
            Err(TranslationError::NotMapped)
        }
    }
}

impl RecursivePageTable {
    pub fn pml4t_frame(&self) -> PhysicalFrame<Size4KiB> {
        self.pml4t_frame
    }
}
