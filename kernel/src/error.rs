//! Error taxonomy shared by every public core operation.
use core::fmt;

use arch_x86_64::paging::{MappingError, TranslationError, UnmappingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    NullPointer,
    OutOfBound,
    InvalidArgument,
    UnauthorizedInterruptLine,
    InterruptAlreadyRegistered,
    InterruptNotRegistered,
    NoSuchIrqLine,
    NoMoreFreeMem,
    PagingNotInit,
    MappingAlreadyExists,
    MemoryNotMapped,
    HandlerAlreadyExists,
    SemUninitialized,
    NoSemBlocked,
    NoMutexBlocked,
    SemLocked,
    ForbiddenPriority,
    UnauthorizedAction,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NullPointer => "null pointer",
            KernelError::OutOfBound => "out of bound",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::UnauthorizedInterruptLine => "unauthorized interrupt line",
            KernelError::InterruptAlreadyRegistered => "interrupt already registered",
            KernelError::InterruptNotRegistered => "interrupt not registered",
            KernelError::NoSuchIrqLine => "no such IRQ line",
            KernelError::NoMoreFreeMem => "no more free memory",
            KernelError::PagingNotInit => "paging not initialized",
            KernelError::MappingAlreadyExists => "mapping already exists",
            KernelError::MemoryNotMapped => "memory not mapped",
            KernelError::HandlerAlreadyExists => "fault handler already exists for range",
            KernelError::SemUninitialized => "semaphore uninitialized",
            KernelError::NoSemBlocked => "thread was not blocked on a semaphore",
            KernelError::NoMutexBlocked => "thread was not blocked on a mutex",
            KernelError::SemLocked => "semaphore would block",
            KernelError::ForbiddenPriority => "forbidden priority level",
            KernelError::UnauthorizedAction => "unauthorized action",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for KernelError {}

impl From<MappingError> for KernelError {
    fn from(e: MappingError) -> Self {
        match e {
            MappingError::PageAlreadyMapped => KernelError::MappingAlreadyExists,
            MappingError::FrameAllocationFailed => KernelError::NoMoreFreeMem,
        }
    }
}

impl From<UnmappingError> for KernelError {
    fn from(e: UnmappingError) -> Self {
        match e {
            UnmappingError::PageNotMapped => KernelError::MemoryNotMapped,
        }
    }
}

impl From<TranslationError> for KernelError {
    fn from(e: TranslationError) -> Self {
        match e {
            TranslationError::NotMapped => KernelError::MemoryNotMapped,
        }
    }
}
