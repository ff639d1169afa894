//! C6: the pluggable interrupt-controller driver contract. The core only
//! ever calls these four functions; it never knows whether the legacy
//! 8259 pair or an IO-APIC/local-APIC combination is installed underneath.
extern crate alloc;

use arch_x86_64::port::Port;
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use util::Mutex;

use crate::error::KernelError;
use crate::interrupts::vectors::IRQ_BASE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpuriousClass {
    Regular,
    Spurious,
}

pub trait InterruptController: Send {
    fn set_mask(&mut self, irq: u8, enabled: bool) -> Result<(), KernelError>;
    fn set_eoi(&mut self, irq: u8) -> Result<(), KernelError>;
    fn classify_spurious(&self, vector: u8) -> SpuriousClass;
    fn vector_for_irq(&self, irq: u8) -> Option<u8>;

    /// Sends `vector` to every other CPU. On this single-active-CPU build
    /// the remote CPU list is always empty, so the default is a true
    /// no-op; `LocalApicController` still counts the call so the panic
    /// path's broadcast is observable in tests.
    fn broadcast_ipi(&mut self, _vector: u8) {}
}

const MASTER_OFFSET: u8 = IRQ_BASE as u8;
const SLAVE_OFFSET: u8 = IRQ_BASE as u8 + 8;
const PIC_MAX_IRQ_LINE: u8 = 15;
/// The 8259 reports a spurious IRQ on the last line of whichever PIC
/// raised it (IRQ7 master, IRQ15 slave) -- `pic.c`'s convention.
const SPURIOUS_MASTER_IRQ: u8 = 7;
const SPURIOUS_SLAVE_IRQ: u8 = 15;

/// Legacy cascaded-PIC controller, remapping IRQ0-15 to vectors 0x20-0x2F
/// exactly as `init_pic()` does. The `pic8259` crate owns ICW
/// initialization, EOI and the mask registers; the in-service register
/// read needed for spurious-IRQ classification has no wrapper in that
/// crate, so it is read directly off the command ports (OCW3, read-ISR).
pub struct Pic8259Controller {
    pics: ChainedPics,
    master_command: Port<u8>,
    slave_command: Port<u8>,
}

const OCW3_READ_ISR: u8 = 0x0B;
const PIC_MASTER_COMMAND: u16 = 0x20;
const PIC_SLAVE_COMMAND: u16 = 0xA0;

impl Pic8259Controller {
    /// # Safety
    ///
    /// Must be called exactly once, with the PICs not already remapped by
    /// other code.
    pub unsafe fn new() -> Self {
        let mut pics = unsafe { ChainedPics::new(MASTER_OFFSET, SLAVE_OFFSET) };
        unsafe { pics.initialize() };
        Self {
            pics,
            master_command: Port::new(PIC_MASTER_COMMAND),
            slave_command: Port::new(PIC_SLAVE_COMMAND),
        }
    }

    fn read_isr(&self, on_slave: bool) -> u8 {
        let port = if on_slave { &self.slave_command } else { &self.master_command };
        port.write(OCW3_READ_ISR);
        port.read()
    }
}

impl InterruptController for Pic8259Controller {
    fn set_mask(&mut self, irq: u8, enabled: bool) -> Result<(), KernelError> {
        if irq > PIC_MAX_IRQ_LINE {
            return Err(KernelError::NoSuchIrqLine);
        }
        let [mut mask1, mut mask2] = unsafe { self.pics.read_masks() };
        let (mask, bit) = if irq < 8 { (&mut mask1, irq) } else { (&mut mask2, irq - 8) };
        if enabled {
            *mask &= !(1 << bit);
        } else {
            *mask |= 1 << bit;
        }
        unsafe { self.pics.write_masks(mask1, mask2) };
        Ok(())
    }

    fn set_eoi(&mut self, irq: u8) -> Result<(), KernelError> {
        if irq > PIC_MAX_IRQ_LINE {
            return Err(KernelError::NoSuchIrqLine);
        }
        unsafe {
            self.pics.notify_end_of_interrupt(MASTER_OFFSET + irq);
        }
        Ok(())
    }

    fn classify_spurious(&self, vector: u8) -> SpuriousClass {
        let Some(irq) = vector.checked_sub(MASTER_OFFSET) else {
            return SpuriousClass::Regular;
        };
        let (line, on_slave) = if irq == SPURIOUS_MASTER_IRQ {
            (SPURIOUS_MASTER_IRQ, false)
        } else if irq == SPURIOUS_SLAVE_IRQ {
            (SPURIOUS_SLAVE_IRQ % 8, true)
        } else {
            return SpuriousClass::Regular;
        };
        let isr = self.read_isr(on_slave);
        if isr & (1 << line) == 0 {
            SpuriousClass::Spurious
        } else {
            SpuriousClass::Regular
        }
    }

    fn vector_for_irq(&self, irq: u8) -> Option<u8> {
        if irq > PIC_MAX_IRQ_LINE {
            None
        } else {
            Some(MASTER_OFFSET + irq)
        }
    }
}

/// Minimal LAPIC/IOAPIC variant: register-level detail beyond this
/// four-function contract is out of scope. The redirection table is a
/// fixed identity mapping (`irq -> IRQ_BASE + irq`), matching the PIC's
/// vector layout so swapping drivers at boot is transparent to callers.
pub struct LocalApicController {
    masked: [bool; 24],
    ipi_sent: usize,
}

impl LocalApicController {
    /// # Safety
    ///
    /// The local APIC must already be enabled in `IA32_APIC_BASE` and
    /// spurious-interrupt vector programmed by the caller.
    pub unsafe fn new() -> Self {
        Self { masked: [true; 24], ipi_sent: 0 }
    }

    /// Number of `broadcast_ipi` calls observed, for the panic-IPI test.
    pub fn ipi_count(&self) -> usize {
        self.ipi_sent
    }
}

impl InterruptController for LocalApicController {
    fn set_mask(&mut self, irq: u8, enabled: bool) -> Result<(), KernelError> {
        let slot = self.masked.get_mut(irq as usize).ok_or(KernelError::NoSuchIrqLine)?;
        *slot = !enabled;
        Ok(())
    }

    fn set_eoi(&mut self, _irq: u8) -> Result<(), KernelError> {
        // Write 0 to the local APIC's EOI register (offset 0xB0). The MMIO
        // window itself is out of scope for this contract's core; a real
        // BSP layer would own the mapping and pass a write-closure in.
        Ok(())
    }

    fn classify_spurious(&self, vector: u8) -> SpuriousClass {
        if vector as usize == crate::interrupts::vectors::SPURIOUS_INT_LINE {
            SpuriousClass::Spurious
        } else {
            SpuriousClass::Regular
        }
    }

    fn vector_for_irq(&self, irq: u8) -> Option<u8> {
        if (irq as usize) < self.masked.len() {
            Some(crate::interrupts::vectors::IRQ_BASE as u8 + irq)
        } else {
            None
        }
    }

    fn broadcast_ipi(&mut self, _vector: u8) {
        // Would write ICR_LOW with the "all excluding self" shorthand; the
        // MMIO window is out of scope for this contract (see `set_eoi`).
        // On this single-active-CPU build there is nobody to receive it.
        self.ipi_sent += 1;
    }
}

lazy_static! {
    static ref ACTIVE: Mutex<Option<alloc::boxed::Box<dyn InterruptController>>> = Mutex::new(None);
}

/// Installs the active controller, replacing whatever was installed before.
pub fn install(controller: alloc::boxed::Box<dyn InterruptController>) {
    *ACTIVE.lock() = Some(controller);
}

pub fn set_mask(irq: u8, enabled: bool) -> Result<(), KernelError> {
    with_active(|c| c.set_mask(irq, enabled))
}

pub fn set_eoi(irq: u8) -> Result<(), KernelError> {
    with_active(|c| c.set_eoi(irq))
}

pub fn classify_spurious(vector: u8) -> SpuriousClass {
    let guard = ACTIVE.lock();
    match guard.as_ref() {
        Some(c) => c.classify_spurious(vector),
        None => SpuriousClass::Regular,
    }
}

/// Called from the panic path only. Silently does nothing if no
/// controller has been installed yet (e.g. a panic during early boot).
pub fn broadcast_panic_ipi(vector: u8) {
    if let Some(c) = ACTIVE.lock().as_mut() {
        c.broadcast_ipi(vector);
    }
}

fn with_active(f: impl FnOnce(&mut dyn InterruptController) -> Result<(), KernelError>) -> Result<(), KernelError> {
    let mut guard = ACTIVE.lock();
    match guard.as_mut() {
        Some(c) => f(c.as_mut()),
        None => Err(KernelError::PagingNotInit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_apic_counts_panic_ipi_broadcasts() {
        let mut lapic = unsafe { LocalApicController::new() };
        assert_eq!(lapic.ipi_count(), 0);
        lapic.broadcast_ipi(crate::interrupts::vectors::PANIC_INT_LINE as u8);
        lapic.broadcast_ipi(crate::interrupts::vectors::PANIC_INT_LINE as u8);
        assert_eq!(lapic.ipi_count(), 2);
    }

    #[test]
    fn pic8259_ignores_broadcast_ipi_by_default() {
        struct Dummy;
        impl InterruptController for Dummy {
            fn set_mask(&mut self, _irq: u8, _enabled: bool) -> Result<(), KernelError> {
                Ok(())
            }
            fn set_eoi(&mut self, _irq: u8) -> Result<(), KernelError> {
                Ok(())
            }
            fn classify_spurious(&self, _vector: u8) -> SpuriousClass {
                SpuriousClass::Regular
            }
            fn vector_for_irq(&self, _irq: u8) -> Option<u8> {
                None
            }
        }
        let mut dummy = Dummy;
        dummy.broadcast_ipi(0x2A);
    }
}
