//! Kernel heap: a fixed-size virtual range carved out of C2's free page
//! pool, mapped through C3, and handed to a buddy allocator as the
//! `#[global_allocator]`. Everything under `alloc::` (the scheduler's
//! `BTreeMap`/`Vec`/`Box`, the sync primitives' `VecDeque`) ultimately
//! bottoms out here.
extern crate alloc;

pub mod buddy_allocator;

use arch_x86_64::memory::Address;
use arch_x86_64::memory::PAGE_SIZE;
use buddy_allocator::BuddyAllocator;
use util::{Mutex, MutexGuard};

use crate::error::KernelError;
use crate::mm::{mapper, page_allocator};

pub const HEAP_SIZE: usize = 256 * 1024;

pub struct Locked<A> {
    inner: Mutex<A>,
}

impl<A> Locked<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner: Mutex::new(inner) }
    }

    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock()
    }
}

#[global_allocator]
static ALLOCATOR: Locked<BuddyAllocator> = Locked::new(BuddyAllocator::new());

/// Reserves `HEAP_SIZE` bytes of virtual space from C2, backs it with
/// freshly allocated frames through C3, and seeds the buddy allocator with
/// the result. Must run after both are initialized and before the first
/// `alloc`/`Box`/`Vec` use.
pub fn init() -> Result<(), KernelError> {
    let pages = HEAP_SIZE as u64 / PAGE_SIZE;
    let heap_start = page_allocator::alloc_pages(pages)?;
    mapper::map_alloc(heap_start, HEAP_SIZE as u64, mapper::MapFlags::WRITABLE)?;
    ALLOCATOR.lock().init(heap_start, HEAP_SIZE as u64);
    Ok(())
}
