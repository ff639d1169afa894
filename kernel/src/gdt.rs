//! Kernel GDT and TSS bring-up.
//!
//! The bootloader hands off with whatever flat GDT it used for its own
//! protected/long-mode transition still loaded; it is not ours to keep
//! relying on. This builds a kernel-owned GDT and a TSS carrying a single
//! known-good stack for the double fault handler's IST slot, so a double
//! fault can run even when the faulting thread's own stack is the thing
//! that overflowed.
use arch_x86_64::gdt::{GlobalDescriptorTable, SegmentDescriptor, SegmentSelector};
use arch_x86_64::register::{CS, DS, ES, SS};
use arch_x86_64::tss::{TaskStateSegment, DOUBLE_FAULT_IST_IDX};
use lazy_static::lazy_static;

const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

struct Selectors {
    code: SegmentSelector,
    data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.set_interrupt_stack(DOUBLE_FAULT_IST_IDX, double_fault_stack_top());
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code = gdt.add_entry(SegmentDescriptor::kernel_code_segment());
        let data = gdt.add_entry(SegmentDescriptor::kernel_data_segment());
        let tss = gdt.add_tss(&TSS);
        (gdt, Selectors { code, data, tss })
    };
}

fn double_fault_stack_top() -> u64 {
    static mut DOUBLE_FAULT_STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];
    let start = unsafe { core::ptr::addr_of!(DOUBLE_FAULT_STACK) as u64 };
    start + DOUBLE_FAULT_STACK_SIZE as u64
}

/// Loads the kernel GDT, reloads every segment register to point at it and
/// loads the TSS into the task register. Must run before `interrupts::init`
/// installs a double fault gate with an IST index, since that index is only
/// meaningful once this TSS is the one the CPU consults.
pub fn init() {
    GDT.0.load();
    unsafe {
        CS::write(GDT.1.code);
        DS::write(GDT.1.data);
        ES::write(GDT.1.data);
        SS::write(GDT.1.data);
        TaskStateSegment::load(GDT.1.tss);
    }
}
