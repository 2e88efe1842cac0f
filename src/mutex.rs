//! A mutual exclusion primitive wrapping any [`RawLock`] around protected
//! data.
//!
//! The benchmark-facing surface of this crate is the raw, tokenised
//! [`RawLock`]; everyone else wants the usual RAII shape. [`Mutex`] composes
//! the two: the guard holds the raw lock's token and feeds it back to
//! `release` on drop.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::lock::RawLock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// Generic over the raw lock algorithm `L`. The data can only be accessed
/// through the RAII guard returned from [`lock`], which guarantees the data
/// is only ever accessed when the mutex is locked.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use handoff::mcs::McsLock;
/// use handoff::mutex::Mutex;
///
/// let mutex = Arc::new(Mutex::<_, McsLock>::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     *c_mutex.lock() = 10;
/// })
/// .join().expect("thread::spawn failed");
///
/// assert_eq!(*mutex.lock(), 10);
/// ```
/// [`lock`]: Mutex::lock
pub struct Mutex<T: ?Sized, L: RawLock> {
    lock: L,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, L: RawLock> Send for Mutex<T, L> {}
unsafe impl<T: ?Sized + Send, L: RawLock> Sync for Mutex<T, L> {}

impl<T, L: RawLock> Mutex<T, L> {
    /// Creates a new mutex in an unlocked state ready for use.
    pub fn new(value: T) -> Self {
        Self { lock: L::default(), data: UnsafeCell::new(value) }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, L: RawLock> Mutex<T, L> {
    /// Acquires this mutex, blocking the current thread until it is able to
    /// do so.
    ///
    /// # Panics
    ///
    /// Panics if the underlying algorithm detects a nested same-family
    /// acquisition, see the concrete lock types.
    pub fn lock(&self) -> MutexGuard<'_, T, L> {
        let token = self.lock.acquire();
        MutexGuard { lock: self, token: ManuallyDrop::new(token), marker: PhantomData }
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs
    /// to take place - the mutable borrow statically guarantees no locks
    /// exist.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: We hold exclusive access to the Mutex data.
        unsafe { &mut *self.data.get() }
    }
}

impl<T: Default, L: RawLock> Default for Mutex<T, L> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T, L: RawLock> From<T> for Mutex<T, L> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + fmt::Debug, L: RawLock> fmt::Debug for Mutex<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        d.field("data", &&*self.lock());
        d.finish()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the mutex can be accessed through this guard via
/// its [`Deref`] and [`DerefMut`] implementations.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized, L: RawLock> {
    lock: &'a Mutex<T, L>,
    token: ManuallyDrop<L::Token>,
    // Tokens are thread-bound, so the guard must not cross threads either.
    marker: PhantomData<*mut ()>,
}

// SAFETY: A guard holds exclusive access to the data for its whole lifetime,
// so shared references to it may hand out shared references to the data.
unsafe impl<T: ?Sized + Sync, L: RawLock> Sync for MutexGuard<'_, T, L> {}

impl<T: ?Sized, L: RawLock> Deref for MutexGuard<'_, T, L> {
    type Target = T;

    /// Dereferences the guard to access the underlying data.
    fn deref(&self) -> &T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized, L: RawLock> DerefMut for MutexGuard<'_, T, L> {
    /// Mutably dereferences the guard to access the underlying data.
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: A guard instance holds the lock locked.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug, L: RawLock> fmt::Debug for MutexGuard<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display, L: RawLock> fmt::Display for MutexGuard<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: ?Sized, L: RawLock> Drop for MutexGuard<'_, T, L> {
    fn drop(&mut self) {
        // SAFETY: The token was produced by this lock's acquire on this
        // thread (guards cannot cross threads), and `take` runs exactly once
        // since the only caller is this drop impl.
        unsafe {
            let token = ManuallyDrop::take(&mut self.token);
            self.lock.lock.release(token);
        }
    }
}
