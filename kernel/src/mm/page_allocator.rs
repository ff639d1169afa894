//! C2: free virtual 4 KiB pages in the kernel half of the address space.
//!
//! This hobby kernel does not run in a higher-half layout: the kernel image
//! and its boot stack are identity-mapped, so the virtual range managed
//! here starts right after them, exactly where C1's physical range does.
use boot_api::BootInfo;
use lazy_static::lazy_static;
use util::Mutex;

use arch_x86_64::memory::{Address, VirtualAddress, RECURSIVE_INDEX};
use arch_x86_64::memory::PAGE_SIZE;

use crate::error::KernelError;
use crate::mm::free_list::FreeList;

lazy_static! {
    static ref PAGES: Mutex<FreeList> = Mutex::new(FreeList::new(PAGE_SIZE));
    static ref KERNEL_END: Mutex<u64> = Mutex::new(0);
}

fn recursive_window_base() -> u64 {
    VirtualAddress::from_indices(RECURSIVE_INDEX as usize, 0, 0, 0, 0).as_u64()
}

fn align_up(v: u64, align: u64) -> u64 {
    (v + align - 1) & !(align - 1)
}

pub fn init(boot_info: &BootInfo) {
    let kernel_end = align_up(
        boot_info
            .kernel_image
            .end()
            .max(boot_info.kernel_stack.start + boot_info.kernel_stack.len),
        PAGE_SIZE,
    );
    *KERNEL_END.lock() = kernel_end;

    let top = recursive_window_base();
    PAGES.lock().add_region(kernel_end, top - kernel_end);
}

pub fn kernel_end() -> u64 {
    *KERNEL_END.lock()
}

pub fn alloc_pages(n: u64) -> Result<VirtualAddress, KernelError> {
    PAGES.lock().alloc(n).map(VirtualAddress::new)
}

pub fn alloc_pages_from(base: VirtualAddress, n: u64) -> Result<(), KernelError> {
    PAGES.lock().alloc_from(base.as_u64(), n)
}

pub fn free_pages(addr: VirtualAddress, n: u64) -> Result<(), KernelError> {
    if addr.as_u64() < kernel_end() {
        return Err(KernelError::InvalidArgument);
    }
    PAGES.lock().free(addr.as_u64(), n)
}
