//! # Kernel synchronization primitives
//!
//! A generic [`Mutex`] over a pluggable [`RawLock`], plus the [`Interrupt`]
//! token that lets a waiter give up on a contended lock.
//!
//! ```rust
//! use kernel_sync::{Interrupt, SpinMutex};
//!
//! let m = SpinMutex::new(1_u32);
//! let stop = Interrupt::new();
//! *m.lock_interruptible(&stop).unwrap() += 1;
//! assert_eq!(*m.lock(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod interrupt;
mod mutex;
mod raw_spin;

pub use interrupt::{Interrupt, Interrupted};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;

/// Mutex backed by a busy-waiting [`RawSpin`].
pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::with_raw(RawSpin::new(), value)
    }
}

/// Bare mutual exclusion without associated data.
///
/// # Safety
/// Implementations must guarantee that after `lock` returns, or `try_lock`
/// returns `true`, no other caller acquires the lock until `unlock`.
pub unsafe trait RawLock {
    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn unlock(&self);
}
