//! Firmware/bootloader hand-off consumer: turns a `boot_api::BootInfo` into
//! a running memory manager, interrupt table and scheduler.
use arch_x86_64::register::Cr3;
use boot_api::BootInfo;
use log::info;

use crate::error::KernelError;

/// Brings the kernel core up to the point where threads can be created and
/// interrupts are live. Order matters: logging first (so every later step
/// can report itself), then memory management (C1-C3), then the interrupt
/// table (C5/C6) and finally the scheduler (C7) and its timer (C9).
pub fn kernel_init(boot_info: &BootInfo) -> Result<(), KernelError> {
    crate::logger::init();
    info!("booting: kernel image {:#x}..{:#x}", boot_info.kernel_image.start, boot_info.kernel_image.end());

    let (pml4t_frame, _) = Cr3::read();
    crate::mm::init(boot_info, pml4t_frame);
    info!("memory manager initialized");

    crate::allocator::init()?;
    info!("kernel heap mapped ({} KiB)", crate::allocator::HEAP_SIZE / 1024);

    crate::gdt::init();
    info!("gdt and tss loaded");

    crate::interrupts::init();
    let pic = unsafe { crate::interrupts::controller::Pic8259Controller::new() };
    crate::interrupts::controller::install(alloc::boxed::Box::new(pic));
    info!("interrupt table and legacy PIC installed");

    crate::timer::init(crate::timer::DEFAULT_FREQUENCY_HZ)?;
    info!("timer armed at {} Hz", crate::timer::DEFAULT_FREQUENCY_HZ);

    crate::sched::init(boot_info)?;
    info!("scheduler initialized");

    Ok(())
}
