//! C3: installs, removes and queries virtual->physical mappings through
//! genuine x86_64 recursive self-mapping (`RecursivePageTable`).
extern crate alloc;

use arch_x86_64::memory::{Address, Page, PageSize, PhysicalAddress, PhysicalFrame, Size4KiB, VirtualAddress};
use arch_x86_64::paging::recursive_page_table::RecursivePageTable;
use arch_x86_64::paging::{Mapper as ArchMapper, MappingError, PageTableEntryFlags, Translator as ArchTranslator};
use bitflags::bitflags;
use lazy_static::lazy_static;
use util::Mutex;

use crate::error::KernelError;
use crate::mm::frame_allocator::{self, GlobalFrameAllocator};

bitflags! {
    /// Union of mapping flags exposed at the kernel-crate seam, independent
    /// of the architecture layer's raw `PageTableEntryFlags` bit positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const WRITABLE = 1 << 0;
        const EXECUTABLE = 1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const CACHE_ENABLED = 1 << 3;
        const WRITE_BACK = 1 << 4;
        const ALLOW_REMAP = 1 << 5;
        /// Stored as the otherwise-unused `GLOBAL` bit; marks a mapping as
        /// hardware-backed (MMIO) rather than ordinary RAM per §4.3's
        /// `map_hw`.
        const HARDWARE_BACKED = 1 << 6;
    }
}

impl MapFlags {
    fn to_entry_flags(self) -> PageTableEntryFlags {
        let mut flags = PageTableEntryFlags::PRESENT;
        if self.contains(MapFlags::WRITABLE) {
            flags |= PageTableEntryFlags::WRITABLE;
        }
        if self.contains(MapFlags::USER_ACCESSIBLE) {
            flags |= PageTableEntryFlags::USER_ACCESSIBLE;
        }
        if !self.contains(MapFlags::EXECUTABLE) {
            flags |= PageTableEntryFlags::NO_EXECUTE;
        }
        if !self.contains(MapFlags::CACHE_ENABLED) {
            flags |= PageTableEntryFlags::NO_CACHE;
        }
        if !self.contains(MapFlags::WRITE_BACK) {
            flags |= PageTableEntryFlags::WRITE_THROUGH;
        }
        if self.contains(MapFlags::HARDWARE_BACKED) {
            flags |= PageTableEntryFlags::GLOBAL;
        }
        flags
    }
}

/// Intermediate page-table frames (PDPT/PDT/PT) allocated by `map*` are not
/// pruned back to C1 when their last leaf is unmapped: doing so correctly
/// would need `RecursivePageTable` to expose per-table occupancy, which it
/// currently doesn't (see DESIGN.md). `unmap` still frees every leaf frame
/// it is responsible for; only the, comparatively tiny, intermediate
/// tables are leaked for the kernel's lifetime. Acceptable for a kernel
/// that never tears down an address space.
struct AddressSpace {
    table: RecursivePageTable,
}

lazy_static! {
    static ref ADDRESS_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);
}

/// # Safety
///
/// `pml4t_frame` must be the frame currently loaded in CR3, with its
/// recursive entry already installed (see `RecursivePageTable::init`).
pub unsafe fn init(pml4t_frame: PhysicalFrame<Size4KiB>) {
    let table = unsafe { RecursivePageTable::new(pml4t_frame) };
    *ADDRESS_SPACE.lock() = Some(AddressSpace { table });
}

fn with_space<R>(f: impl FnOnce(&mut AddressSpace) -> Result<R, KernelError>) -> Result<R, KernelError> {
    let mut guard = ADDRESS_SPACE.lock();
    let space = guard.as_mut().ok_or(KernelError::PagingNotInit)?;
    f(space)
}

fn check_aligned(addr: u64, size: u64) -> Result<(), KernelError> {
    let page_size = arch_x86_64::memory::PAGE_SIZE;
    if addr % page_size != 0 || size % page_size != 0 || size == 0 {
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

/// `map(virt, phys, size, flags)`.
pub fn map(virt: VirtualAddress, phys: PhysicalAddress, size: u64, flags: MapFlags) -> Result<(), KernelError> {
    check_aligned(virt.as_u64(), size)?;
    check_aligned(phys.as_u64(), size)?;
    let page_size = arch_x86_64::memory::PAGE_SIZE;
    let count = size / page_size;
    let entry_flags = flags.to_entry_flags();
    let allow_remap = flags.contains(MapFlags::ALLOW_REMAP);

    with_space(|space| {
        let mut mapped = 0u64;
        for i in 0..count {
            let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(virt.as_u64() + i * page_size));
            let frame = PhysicalFrame::<Size4KiB>::containing_address(PhysicalAddress::new(phys.as_u64() + i * page_size));
            match map_one_page(space, page, frame, entry_flags, allow_remap) {
                Ok(flusher) => {
                    flusher.flush();
                    mapped += 1;
                }
                Err(e) => {
                    rollback(space, virt, mapped, page_size);
                    return Err(KernelError::from(e));
                }
            }
        }
        Ok(())
    })
}

/// `map_alloc(virt, size, flags)` — pulls a fresh physical frame per page.
pub fn map_alloc(virt: VirtualAddress, size: u64, flags: MapFlags) -> Result<(), KernelError> {
    check_aligned(virt.as_u64(), size)?;
    let page_size = arch_x86_64::memory::PAGE_SIZE;
    let count = size / page_size;
    let entry_flags = flags.to_entry_flags();
    let allow_remap = flags.contains(MapFlags::ALLOW_REMAP);

    with_space(|space| {
        let mut mapped_frames: alloc::vec::Vec<PhysicalAddress> = alloc::vec::Vec::new();
        for i in 0..count {
            let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(virt.as_u64() + i * page_size));
            let phys = match frame_allocator::alloc_frames(1) {
                Ok(p) => p,
                Err(e) => {
                    rollback(space, virt, i, page_size);
                    for f in &mapped_frames {
                        let _ = frame_allocator::free_frames(*f, 1);
                    }
                    return Err(e);
                }
            };
            let frame = PhysicalFrame::<Size4KiB>::containing_address(phys);
            match map_one_page(space, page, frame, entry_flags, allow_remap) {
                Ok(flusher) => {
                    flusher.flush();
                    mapped_frames.push(phys);
                }
                Err(e) => {
                    let _ = frame_allocator::free_frames(phys, 1);
                    rollback(space, virt, i, page_size);
                    for f in &mapped_frames {
                        let _ = frame_allocator::free_frames(*f, 1);
                    }
                    return Err(KernelError::from(e));
                }
            }
        }
        Ok(())
    })
}

/// `map_hw(virt, phys, size, flags)` — like `map` but hardware-backed and
/// uncached by default.
pub fn map_hw(virt: VirtualAddress, phys: PhysicalAddress, size: u64, flags: MapFlags) -> Result<(), KernelError> {
    let flags = (flags | MapFlags::HARDWARE_BACKED) & !MapFlags::CACHE_ENABLED;
    map(virt, phys, size, flags)
}

/// Maps `page` to `frame`, and when `allow_remap` is set and the page is
/// already present, unmaps the existing leaf first and retries instead of
/// propagating `PageAlreadyMapped`. This is the only place `ALLOW_REMAP`
/// is consulted; a caller that didn't set it still gets
/// `MappingAlreadyExists` out of the first `map_to` attempt.
fn map_one_page(
    space: &mut AddressSpace,
    page: Page<Size4KiB>,
    frame: PhysicalFrame<Size4KiB>,
    entry_flags: PageTableEntryFlags,
    allow_remap: bool,
) -> Result<arch_x86_64::paging::TlbFlusher<Size4KiB>, MappingError> {
    let mut allocator = GlobalFrameAllocator;
    match space.table.map_to(frame, page, entry_flags, &mut allocator) {
        Err(MappingError::PageAlreadyMapped) if allow_remap => {
            if let Ok((_, flusher)) = space.table.unmap(page) {
                flusher.flush();
            }
            space.table.map_to(frame, page, entry_flags, &mut allocator)
        }
        other => other,
    }
}

/// Unmaps every page in `[virt, virt+n*4096)` already mapped, used to roll
/// back a partially-completed `map*` call.
fn rollback(space: &mut AddressSpace, virt: VirtualAddress, mapped_pages: u64, page_size: u64) {
    for i in 0..mapped_pages {
        let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(virt.as_u64() + i * page_size));
        if let Ok((_, flusher)) = space.table.unmap(page) {
            flusher.flush();
        }
    }
}

/// `unmap(virt, size)` — returns the frames freed (meaningful for
/// `map_alloc` pages).
pub fn unmap(virt: VirtualAddress, size: u64) -> Result<alloc::vec::Vec<PhysicalAddress>, KernelError> {
    check_aligned(virt.as_u64(), size)?;
    let page_size = arch_x86_64::memory::PAGE_SIZE;
    let count = size / page_size;

    with_space(|space| {
        let mut freed = alloc::vec::Vec::new();
        for i in 0..count {
            let page = Page::<Size4KiB>::containing_address(VirtualAddress::new(virt.as_u64() + i * page_size));
            let (frame, flusher) = space.table.unmap(page).map_err(KernelError::from)?;
            flusher.flush();
            freed.push(frame.address);
        }
        Ok(freed)
    })
}

/// `translate(virt) -> Option<PhysicalAddress>`.
pub fn translate(virt: VirtualAddress) -> Option<PhysicalAddress> {
    let guard = ADDRESS_SPACE.lock();
    let space = guard.as_ref()?;
    let page = Page::<Size4KiB>::containing_address(virt);
    space
        .table
        .translate(page)
        .ok()
        .map(|(frame, _)| PhysicalAddress::new(frame.start() + virt.page_offset()))
}

/// `is_mapped(virt, size) -> bool`.
pub fn is_mapped(virt: VirtualAddress, size: u64) -> bool {
    let page_size = arch_x86_64::memory::PAGE_SIZE;
    let count = size / page_size;
    (0..count).all(|i| translate(VirtualAddress::new(virt.as_u64() + i * page_size)).is_some())
}
