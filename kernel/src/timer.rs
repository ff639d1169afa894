//! C9: the timer abstraction the scheduler consumes as its tick source,
//! decoupled from which concrete chip actually ticks.
use arch_x86_64::port::Port;
use lazy_static::lazy_static;
use util::Mutex;

use crate::error::KernelError;
use crate::interrupts::vectors::TIMER_INTERRUPT_LINE;
use crate::interrupts::{self, controller};

pub const MIN_FREQUENCY_HZ: u32 = 20;
pub const MAX_FREQUENCY_HZ: u32 = 8000;
pub const DEFAULT_FREQUENCY_HZ: u32 = 100;

const PIT_BASE_FREQUENCY: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
/// Channel 0, lobyte/hibyte access, mode 2 (rate generator).
const PIT_CHANNEL0_MODE2: u8 = 0b0011_0100;

pub trait TimerController: Send {
    fn get_frequency(&self) -> u32;
    fn set_frequency(&mut self, hz: u32) -> Result<(), KernelError>;
    fn enable(&mut self);
    fn disable(&mut self);
    fn get_irq(&self) -> u8;
}

pub struct Pit8254Timer {
    frequency: u32,
    command: Port<u8>,
    channel0: Port<u8>,
    irq: u8,
}

impl Pit8254Timer {
    /// # Safety
    ///
    /// Must be called at most once; reprograms PIT channel 0 globally.
    pub unsafe fn new(irq: u8) -> Self {
        let mut timer = Self {
            frequency: DEFAULT_FREQUENCY_HZ,
            command: Port::new(PIT_COMMAND),
            channel0: Port::new(PIT_CHANNEL0_DATA),
            irq,
        };
        timer.program(DEFAULT_FREQUENCY_HZ);
        timer
    }

    fn program(&mut self, hz: u32) {
        let divisor = (PIT_BASE_FREQUENCY / hz).clamp(1, u16::MAX as u32) as u16;
        self.command.write(PIT_CHANNEL0_MODE2);
        self.channel0.write((divisor & 0xFF) as u8);
        self.channel0.write((divisor >> 8) as u8);
        self.frequency = hz;
    }
}

impl TimerController for Pit8254Timer {
    fn get_frequency(&self) -> u32 {
        self.frequency
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), KernelError> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
            return Err(KernelError::InvalidArgument);
        }
        self.program(hz);
        Ok(())
    }

    fn enable(&mut self) {
        let _ = controller::set_mask(self.irq, true);
    }

    fn disable(&mut self) {
        let _ = controller::set_mask(self.irq, false);
    }

    fn get_irq(&self) -> u8 {
        self.irq
    }
}

lazy_static! {
    static ref TIMER: Mutex<Option<alloc::boxed::Box<dyn TimerController>>> = Mutex::new(None);
    static ref TICK_HANDLER: Mutex<Option<fn()>> = Mutex::new(None);
}

fn tick_trampoline(_frame: &arch_x86_64::interrupts::ExceptionStackFrame, _error_code: u64) {
    if let Some(handler) = *TICK_HANDLER.lock() {
        handler();
    }
}

/// Installs the PIT as the active timer, registers the tick trampoline on
/// the timer's IRQ line, and unmasks it.
pub fn init(hz: u32) -> Result<(), KernelError> {
    let irq = crate::interrupts::vectors::TIMER_IRQ_LINE;
    let timer = unsafe { Pit8254Timer::new(irq) };
    *TIMER.lock() = Some(alloc::boxed::Box::new(timer));
    set_frequency(hz)?;
    interrupts::register_interrupt(TIMER_INTERRUPT_LINE, tick_trampoline)?;
    enable();
    Ok(())
}

/// Installs the scheduler's per-tick callback, called from interrupt
/// context on every timer IRQ.
pub fn set_handler(handler: fn()) {
    *TICK_HANDLER.lock() = Some(handler);
}

pub fn remove_handler() {
    *TICK_HANDLER.lock() = None;
}

pub fn get_frequency() -> u32 {
    TIMER.lock().as_ref().map_or(0, |t| t.get_frequency())
}

pub fn set_frequency(hz: u32) -> Result<(), KernelError> {
    let mut guard = TIMER.lock();
    let timer = guard.as_mut().ok_or(KernelError::PagingNotInit)?;
    timer.set_frequency(hz)
}

pub fn enable() {
    if let Some(timer) = TIMER.lock().as_mut() {
        timer.enable();
    }
}

pub fn disable() {
    if let Some(timer) = TIMER.lock().as_mut() {
        timer.disable();
    }
}

pub fn get_irq() -> u8 {
    TIMER.lock().as_ref().map_or(0, |t| t.get_irq())
}
