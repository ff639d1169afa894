#![no_std]

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};

/// Asserts a const expression at compile time.
#[macro_export]
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    };
}
