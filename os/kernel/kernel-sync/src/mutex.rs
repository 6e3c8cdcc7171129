use crate::{Interrupt, Interrupted, RawLock};
use core::cell::UnsafeCell;
use core::fmt;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};

/// Data protected by a raw lock `R`.
pub struct Mutex<T, R> {
    raw: R,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send, R: RawLock + Sync> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    #[must_use]
    pub const fn with_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(value),
        }
    }

    /// Access the data through an exclusive borrow, no locking needed.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T, R: RawLock> Mutex<T, R> {
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.try_lock().then(|| MutexGuard { mutex: self })
    }

    /// Acquire the lock unless `interrupt` is raised while waiting.
    ///
    /// An uncontended lock is always taken, even with a raised token; the
    /// token is only consulted once the first attempt fails.
    ///
    /// # Errors
    /// [`Interrupted`] if the token was raised before the lock became free.
    pub fn lock_interruptible(
        &self,
        interrupt: &Interrupt,
    ) -> Result<MutexGuard<'_, T, R>, Interrupted> {
        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            if interrupt.is_raised() {
                return Err(Interrupted);
            }
            spin_loop();
        }
    }

    /// Run `f` with the lock held.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

impl<T, R> fmt::Debug for Mutex<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// RAII guard; the lock is released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T, R: RawLock> {
    mutex: &'a Mutex<T, R>,
}

impl<T, R: RawLock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T, R: RawLock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held, and `&mut self` makes
        // this the only access through it.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T, R: RawLock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        // SAFETY: acquired when the guard was created.
        unsafe { self.mutex.raw.unlock() }
    }
}
