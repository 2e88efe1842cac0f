//! The uniform surface every lock variant exposes to callers.
//!
//! A [`RawLock`] is a bare mutual exclusion point: it protects no data of its
//! own and returns an opaque [`Token`] as proof of ownership. Benchmark
//! harnesses dispatch over this trait; the [`Mutex`] wrapper builds an RAII
//! guard on top of it for everyone else.
//!
//! [`Token`]: RawLock::Token
//! [`Mutex`]: crate::mutex::Mutex

/// A raw mutual exclusion lock with explicit, tokenised hand-over.
///
/// `acquire` blocks by busy-waiting until the calling thread holds the lock
/// and returns a token; `release` consumes that token, handing the lock to a
/// successor if one is queued. Neither operation ever fails, and neither
/// allocates on the hot path after a thread's first acquisition.
///
/// Tokens are thread-bound: they must be consumed exactly once, by the thread
/// that produced them, against the lock that produced them. None of this is
/// checked in release builds.
///
/// # Safety
///
/// Implementations must guarantee mutual exclusion: between a call to
/// `acquire` returning a token and the matching `release` consuming it, no
/// other matched pair on the same lock may overlap.
pub unsafe trait RawLock: Default + Send + Sync {
    /// Proof of ownership for one acquire/release episode, carrying whatever
    /// hand-off state the algorithm needs at release time.
    type Token;

    /// Acquires this lock, blocking the current thread until it is able to
    /// do so.
    fn acquire(&self) -> Self::Token;

    /// Releases this lock, consuming the token produced by the matching
    /// [`acquire`].
    ///
    /// # Safety
    ///
    /// `token` must have been returned by `self.acquire()` on the calling
    /// thread, and must not have been released before. Violations are not
    /// detected; they corrupt the queue state.
    ///
    /// [`acquire`]: RawLock::acquire
    unsafe fn release(&self, token: Self::Token);
}
