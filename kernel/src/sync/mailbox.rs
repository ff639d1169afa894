//! C8: single-slot specialization of the queue construction -- the same
//! `readable`/`writable` semaphore pair, but with `Option<T>` standing in
//! for a one-element ring so there's no index arithmetic to carry.
use crate::error::KernelError;
use crate::sync::semaphore::Semaphore;
use util::Mutex;

pub struct Mailbox<T> {
    readable: Semaphore,
    writable: Semaphore,
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            readable: Semaphore::new(0),
            writable: Semaphore::new(1),
            slot: Mutex::new(None),
        }
    }

    pub fn post(&self, item: T) -> Result<(), KernelError> {
        self.writable.pend()?;
        *self.slot.lock() = Some(item);
        self.readable.post()
    }

    pub fn try_post(&self, item: T) -> Result<(), KernelError> {
        self.writable.try_pend()?;
        *self.slot.lock() = Some(item);
        self.readable.post()
    }

    pub fn pend(&self) -> Result<T, KernelError> {
        self.readable.pend()?;
        let item = self.slot.lock().take().expect("mailbox slot empty on pend");
        self.writable.post()?;
        Ok(item)
    }

    pub fn try_pend(&self) -> Result<T, KernelError> {
        self.readable.try_pend()?;
        let item = self.slot.lock().take().expect("mailbox slot empty on pend");
        self.writable.post()?;
        Ok(item)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn single_slot_round_trip() {
        let mbox: Mailbox<u32> = Mailbox::new();
        mbox.try_post(42).unwrap();
        assert_eq!(mbox.try_post(7), Err(KernelError::SemLocked));
        assert_eq!(mbox.try_pend(), Ok(42));
        assert_eq!(mbox.try_pend(), Err(KernelError::SemLocked));
    }
}
