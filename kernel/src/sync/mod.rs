//! C8: synchronization primitives built on the scheduler's block/unblock
//! contract (`sched_lock_current`/`sched_unlock`) rather than busy-waiting.
pub mod mailbox;
pub mod queue;
pub mod semaphore;

pub use mailbox::Mailbox;
pub use queue::Queue;
pub use semaphore::Semaphore;
