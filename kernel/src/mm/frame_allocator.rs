//! C1: free physical 4 KiB frames discovered from the boot memory map.
use boot_api::BootInfo;
use lazy_static::lazy_static;
use util::Mutex;

use arch_x86_64::memory::{Address, PageSize, PhysicalAddress, PhysicalFrame, Size4KiB};
use arch_x86_64::memory::PAGE_SIZE;

use crate::error::KernelError;
use crate::mm::free_list::FreeList;

lazy_static! {
    static ref FRAMES: Mutex<FreeList> = Mutex::new(FreeList::new(PAGE_SIZE));
}

/// Ingests the firmware memory map, registering every `Usable` region that
/// lies wholly above the kernel image, trimming regions that straddle it.
pub fn init(boot_info: &BootInfo) {
    let kernel_end = align_up(boot_info.kernel_image.end(), PAGE_SIZE);
    let mut frames = FRAMES.lock();
    for region in boot_info.memory_regions.iter() {
        if !region.is_usable() {
            continue;
        }
        let start = region.start.max(kernel_end);
        let end = region.end();
        if start >= end {
            continue;
        }
        let start = align_up(start, PAGE_SIZE);
        let end = align_down(end, PAGE_SIZE);
        if end > start {
            frames.add_region(start, end - start);
        }
    }
}

fn align_up(v: u64, align: u64) -> u64 {
    (v + align - 1) & !(align - 1)
}

fn align_down(v: u64, align: u64) -> u64 {
    v & !(align - 1)
}

/// Allocates `n` physically contiguous 4 KiB frames.
pub fn alloc_frames(n: u64) -> Result<PhysicalAddress, KernelError> {
    FRAMES.lock().alloc(n).map(PhysicalAddress::new)
}

/// Returns `n` frames starting at `addr` to the pool.
pub fn free_frames(addr: PhysicalAddress, n: u64) -> Result<(), KernelError> {
    FRAMES.lock().free(addr.as_u64(), n)
}

/// Adapter implementing `arch_x86_64::frame_allocator::FrameAllocator` over
/// the global frame pool, so the mapper can pull fresh page-table frames
/// through the same `Mapper::map_to` seam it uses for ordinary mappings.
pub struct GlobalFrameAllocator;

unsafe impl arch_x86_64::frame_allocator::FrameAllocator<Size4KiB> for GlobalFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysicalFrame<Size4KiB>> {
        alloc_frames(1)
            .ok()
            .map(PhysicalFrame::<Size4KiB>::containing_address)
    }
}
