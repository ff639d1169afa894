//! C8: fixed-capacity producer/consumer queue, built from a ring buffer
//! guarded by a pair of counting semaphores -- `readable` counts filled
//! slots, `writable` counts free ones. `Mailbox` is the N=1 specialization
//! of the same construction.
extern crate alloc;

use alloc::vec::Vec;

use crate::error::KernelError;
use crate::sync::semaphore::Semaphore;
use util::Mutex;

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, tail: 0 }
    }

    fn push(&mut self, item: T) {
        let cap = self.slots.len();
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % cap;
    }

    fn pop(&mut self) -> T {
        let cap = self.slots.len();
        let item = self.slots[self.tail].take().expect("queue ring slot empty on pend");
        self.tail = (self.tail + 1) % cap;
        item
    }
}

/// A bounded FIFO queue of capacity `N`. `post` blocks while full, `pend`
/// blocks while empty; both block the calling thread through the scheduler
/// rather than spinning.
pub struct Queue<T> {
    readable: Semaphore,
    writable: Semaphore,
    ring: Mutex<Ring<T>>,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            readable: Semaphore::new(0),
            writable: Semaphore::new(capacity as i32),
            ring: Mutex::new(Ring::new(capacity)),
        }
    }

    pub fn post(&self, item: T) -> Result<(), KernelError> {
        self.writable.pend()?;
        self.ring.lock().push(item);
        self.readable.post()
    }

    pub fn try_post(&self, item: T) -> Result<(), KernelError> {
        self.writable.try_pend()?;
        self.ring.lock().push(item);
        self.readable.post()
    }

    pub fn pend(&self) -> Result<T, KernelError> {
        self.readable.pend()?;
        let item = self.ring.lock().pop();
        self.writable.post()?;
        Ok(item)
    }

    pub fn try_pend(&self) -> Result<T, KernelError> {
        self.readable.try_pend()?;
        let item = self.ring.lock().pop();
        self.writable.post()?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn fifo_order_preserved() {
        let q: Queue<i32> = Queue::new(3);
        q.try_post(1).unwrap();
        q.try_post(2).unwrap();
        q.try_post(3).unwrap();
        assert_eq!(q.try_post(4), Err(KernelError::SemLocked));
        assert_eq!(q.try_pend(), Ok(1));
        assert_eq!(q.try_pend(), Ok(2));
        assert_eq!(q.try_pend(), Ok(3));
        assert_eq!(q.try_pend(), Err(KernelError::SemLocked));
    }

    #[test]
    fn wraps_around_ring() {
        let q: Queue<i32> = Queue::new(2);
        q.try_post(1).unwrap();
        assert_eq!(q.try_pend(), Ok(1));
        q.try_post(2).unwrap();
        q.try_post(3).unwrap();
        assert_eq!(q.try_pend(), Ok(2));
        assert_eq!(q.try_pend(), Ok(3));
    }
}
