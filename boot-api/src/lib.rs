//! The contract between whatever loads the kernel and the kernel itself.
//!
//! This crate intentionally knows nothing about ELF loading, disk access or
//! the boot protocol used to get here. It only describes the handful of
//! facts the kernel needs from firmware/bootloader before it can bring up
//! its own memory manager: the physical memory map and where the kernel
//! image and its stack already live.
#![no_std]

use core::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryRegionKind {
    /// Free and usable by the frame allocator.
    Usable,
    /// Holds the kernel image itself.
    KernelImage,
    /// Holds the kernel's initial stack.
    KernelStack,
    /// Reserved by firmware, not to be touched.
    Reserved,
    /// Bad memory reported by firmware.
    BadMemory,
    /// Reclaimable once the kernel is done with bootloader structures.
    BootloaderReclaimable,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PhysicalMemoryRegion {
    pub start: u64,
    pub len: u64,
    pub kind: MemoryRegionKind,
}

impl PhysicalMemoryRegion {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Usable)
    }
}

/// A slice of [`PhysicalMemoryRegion`] handed to the kernel by whatever set
/// it up, backed by memory outside of the kernel's own allocators.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PhysicalMemoryRegions {
    ptr: *mut PhysicalMemoryRegion,
    len: usize,
}

impl PhysicalMemoryRegions {
    /// # Safety
    ///
    /// `ptr` must point to `len` valid, initialized [`PhysicalMemoryRegion`]
    /// values that outlive the kernel's use of this struct.
    pub unsafe fn new(ptr: *mut PhysicalMemoryRegion, len: usize) -> Self {
        Self { ptr, len }
    }
}

impl Deref for PhysicalMemoryRegions {
    type Target = [PhysicalMemoryRegion];
    fn deref(&self) -> &[PhysicalMemoryRegion] {
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for PhysicalMemoryRegions {
    fn deref_mut(&mut self) -> &mut [PhysicalMemoryRegion] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

unsafe impl Send for PhysicalMemoryRegions {}
unsafe impl Sync for PhysicalMemoryRegions {}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct VirtualMemoryRegion {
    pub start: u64,
    pub len: u64,
}

/// Everything the kernel needs to start managing memory and hardware on its
/// own. Handed to `kernel_init` by the entry point, wherever that entry
/// point came from.
#[repr(C)]
pub struct BootInfo {
    /// Where the kernel image itself was loaded, so the frame allocator can
    /// exclude it.
    pub kernel_image: PhysicalMemoryRegion,
    /// The stack the kernel is currently executing on.
    pub kernel_stack: VirtualMemoryRegion,
    /// The firmware-provided physical memory map.
    pub memory_regions: PhysicalMemoryRegions,
    /// RSDP address if firmware advertised one. The kernel core does not
    /// parse ACPI tables; this is kept only so a future, out-of-scope ACPI
    /// layer has somewhere to start from.
    pub rsdp_addr: Option<u64>,
}
