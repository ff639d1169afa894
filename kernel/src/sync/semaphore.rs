//! C8: counting semaphore built directly on the scheduler's block/unblock
//! primitives, rather than spinning. Waiters queue in FIFO order with no
//! regard for priority, matching the original driver's waiting list.
extern crate alloc;

use alloc::collections::VecDeque;

use crate::error::KernelError;
use crate::sched::thread::BlockKind;
use crate::interrupts::in_interrupt_context;
use crate::sched::{sched_lock_current, sched_unlock, yield_now, QueueNode};
use util::Mutex;

struct Inner {
    level: i32,
    waiters: VecDeque<QueueNode>,
    init: bool,
}

/// A counting semaphore. `level` starts at the value passed to `new` and is
/// never negative from the caller's perspective -- once it would go below
/// zero, `pend` blocks the calling thread instead.
pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub const fn new(level: i32) -> Self {
        Self {
            inner: Mutex::new(Inner { level, waiters: VecDeque::new(), init: true }),
        }
    }

    /// Blocks the calling thread until a permit is available, re-checking
    /// `init` on every wake to notice a concurrent `destroy`.
    pub fn pend(&self) -> Result<(), KernelError> {
        loop {
            let mut inner = self.inner.lock();
            if !inner.init {
                return Err(KernelError::SemUninitialized);
            }
            if inner.level >= 1 {
                inner.level -= 1;
                return Ok(());
            }
            let node = sched_lock_current(BlockKind::Sem);
            inner.waiters.push_back(node);
            drop(inner);
            yield_now();
        }
    }

    pub fn try_pend(&self) -> Result<(), KernelError> {
        let mut inner = self.inner.lock();
        if !inner.init {
            return Err(KernelError::SemUninitialized);
        }
        if inner.level < 1 {
            return Err(KernelError::SemLocked);
        }
        inner.level -= 1;
        Ok(())
    }

    /// Releases a permit, waking the oldest waiter if one is parked. Outside
    /// interrupt context this reschedules immediately, so a waiter of
    /// higher priority than the poster preempts it before the poster's next
    /// instruction; from interrupt context the reschedule is left to
    /// whatever handler is already mid-dispatch.
    pub fn post(&self) -> Result<(), KernelError> {
        let woken = {
            let mut inner = self.inner.lock();
            if !inner.init {
                return Err(KernelError::SemUninitialized);
            }
            inner.level += 1;
            if inner.level > 0 { inner.waiters.pop_front() } else { None }
        };
        if let Some(node) = woken {
            sched_unlock(node, BlockKind::Sem)?;
            if !in_interrupt_context() {
                yield_now();
            }
        }
        Ok(())
    }

    /// Marks the semaphore dead and releases every waiter with
    /// `SemUninitialized`; their blocked `pend` calls observe `init=false`
    /// on their next wake and return the error themselves.
    pub fn destroy(&self) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.init = false;
            core::mem::take(&mut inner.waiters)
        };
        for node in waiters {
            let _ = sched_unlock(node, BlockKind::Sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn try_pend_respects_level() {
        let sem = Semaphore::new(1);
        assert!(sem.try_pend().is_ok());
        assert_eq!(sem.try_pend(), Err(KernelError::SemLocked));
        sem.post().unwrap();
        assert!(sem.try_pend().is_ok());
    }

    #[test]
    fn post_without_waiters_just_increments() {
        let sem = Semaphore::new(0);
        sem.post().unwrap();
        assert!(sem.try_pend().is_ok());
    }

    #[test]
    fn destroy_marks_uninitialized() {
        let sem = Semaphore::new(0);
        sem.destroy();
        assert_eq!(sem.try_pend(), Err(KernelError::SemUninitialized));
        assert_eq!(sem.post(), Err(KernelError::SemUninitialized));
    }
}
