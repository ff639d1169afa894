//! C4: maps address ranges to registered page-fault callbacks.
extern crate alloc;

use alloc::vec::Vec;

use arch_x86_64::interrupts::{ExceptionStackFrame, PageFaultErrorCode};
use arch_x86_64::memory::{Address, VirtualAddress};
use arch_x86_64::register::Cr2;
use lazy_static::lazy_static;
use log::error;
use util::Mutex;

use crate::error::KernelError;

pub type FaultCallback = fn(VirtualAddress);

struct FaultHandlerEntry {
    start: u64,
    end: u64,
    callback: FaultCallback,
}

lazy_static! {
    static ref HANDLERS: Mutex<Vec<FaultHandlerEntry>> = Mutex::new(Vec::new());
}

/// Registers `callback` for `[start, end)`. Fails with `HandlerAlreadyExists`
/// if the new interval overlaps any already-registered interval.
pub fn register_fault_handler(
    callback: FaultCallback,
    start: VirtualAddress,
    end: VirtualAddress,
) -> Result<(), KernelError> {
    let (start, end) = (start.as_u64(), end.as_u64());
    if end <= start {
        return Err(KernelError::InvalidArgument);
    }

    let mut handlers = HANDLERS.lock();
    let overlaps = handlers.iter().any(|h| start < h.end && end > h.start);
    if overlaps {
        return Err(KernelError::HandlerAlreadyExists);
    }

    let idx = handlers.partition_point(|h| h.start < start);
    handlers.insert(idx, FaultHandlerEntry { start, end, callback });
    Ok(())
}

/// Invoked by the interrupt dispatcher on vector 14. Falls through to the
/// panic path if no registered range claims the faulting address.
pub fn dispatch(frame: &ExceptionStackFrame, error_code: PageFaultErrorCode) {
    let fault_addr = Cr2::read();
    let addr = fault_addr.as_u64();

    let callback = {
        let handlers = HANDLERS.lock();
        handlers
            .iter()
            .find(|h| addr >= h.start && addr < h.end)
            .map(|h| h.callback)
    };

    match callback {
        Some(cb) => cb(fault_addr),
        None => {
            error!(
                "unhandled page fault at {:#x}, error code {:?}, frame {:?}",
                addr, error_code, frame
            );
            crate::panic::panic_from_exception(14, frame, error_code.bits());
        }
    }
}
