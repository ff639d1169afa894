pub mod fault;
pub mod frame_allocator;
pub mod free_list;
pub mod mapper;
pub mod page_allocator;

use boot_api::BootInfo;

/// Brings up C1, C2 and C3 from the boot memory map, in that order: C3
/// needs C1 to draw page-table frames from.
pub fn init(boot_info: &BootInfo, pml4t_frame: arch_x86_64::memory::PhysicalFrame) {
    frame_allocator::init(boot_info);
    page_allocator::init(boot_info);
    unsafe {
        mapper::init(pml4t_frame);
    }
}
