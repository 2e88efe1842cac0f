//! The `mutex` kind: delegation to the platform's native binary mutex.
//!
//! Serves as the baseline the queue locks are measured against. The
//! [`RawLock`] surface needs a guard-free, tokenised unlock, which
//! `std::sync::Mutex` cannot express, so this delegates to
//! [`parking_lot::RawMutex`] (word-sized, kernel-parking under contention).

use core::fmt;

use parking_lot::lock_api::RawMutex as _;

use crate::lock::RawLock;

/// A raw mutual exclusion point delegating to the native binary mutex.
///
/// # Example
///
/// ```
/// use handoff::native::NativeMutex;
/// use handoff::lock::RawLock;
///
/// let lock = NativeMutex::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct NativeMutex {
    inner: parking_lot::RawMutex,
}

impl NativeMutex {
    /// Creates a new, unlocked native mutex.
    pub const fn new() -> Self {
        Self { inner: parking_lot::RawMutex::INIT }
    }
}

impl Default for NativeMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NativeMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMutex").field("locked", &self.inner.is_locked()).finish()
    }
}

// SAFETY: Defers to parking_lot's mutual exclusion guarantee. The native
// mutex carries no per-acquisition hand-off state, so the token is empty.
unsafe impl RawLock for NativeMutex {
    type Token = ();

    fn acquire(&self) {
        self.inner.lock();
    }

    unsafe fn release(&self, _token: ()) {
        // SAFETY: Caller guaranteed this release matches an acquire by this
        // thread, which is exactly parking_lot's unlock contract.
        unsafe { self.inner.unlock() };
    }
}
