use core::sync::atomic::{AtomicBool, Ordering};

/// Cancellation token for blocking lock acquisition.
///
/// A waiter passes the token to [`Mutex::lock_interruptible`](crate::Mutex::lock_interruptible);
/// any other context may [`raise`](Self::raise) it to make the wait return
/// [`Interrupted`] instead of spinning on.
///
/// Raising the token never affects a lock that has already been acquired.
#[derive(Debug, Default)]
pub struct Interrupt {
    raised: AtomicBool,
}

impl Interrupt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Request that waiters holding this token stop waiting.
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Re-arm the token.
    #[inline]
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

/// The wait for a lock was abandoned because its [`Interrupt`] was raised.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("lock wait interrupted")]
pub struct Interrupted;
