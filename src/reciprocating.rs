//! Reciprocating stack-based lock.
//!
//! Arrivals push themselves onto an unbounded LIFO stack rooted in a single
//! `arrivals` word; the word doubles as the lock state. While a holder runs
//! its critical section, new waiters accumulate; at release the holder hands
//! its *entire* accumulated segment to its successor in one store to the
//! successor's `Gate`, and the successor inherits the job of unwinding the
//! segment in LIFO order. Admission order therefore alternates direction as
//! segments flip, giving bounded unfairness in exchange for zero list
//! maintenance while the lock is held. The design follows [Dice and Kogan]'s
//! reciprocating locks.
//!
//! The `arrivals` word carries one of three states:
//!
//! - null: unlocked;
//! - `LOCKED_EMPTY` (tagged value 1): locked, no waiters;
//! - a waiter pointer: locked, that waiter is the newest arrival.
//!
//! A waiter learns the end of its segment (`eos`) from the gate value it is
//! woken with; a waiter whose recorded successor *is* the end of segment is
//! the last of its segment and collapses its token back to the locked-empty
//! state.
//!
//! [Dice and Kogan]: https://arxiv.org/abs/2501.02907

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::sync::atomic::AtomicPtr;

use crossbeam_utils::CachePadded;

use crate::lock::RawLock;
use crate::relax::{Relax, Yield};

/// A waiter record: a single gate the thread spins on, written exactly once
/// per acquisition by the thread handing over the lock.
#[derive(Debug)]
struct WaitElement {
    gate: AtomicPtr<WaitElement>,
}

impl WaitElement {
    const fn new() -> Self {
        Self { gate: AtomicPtr::new(ptr::null_mut()) }
    }
}

/// Sentinel for "locked, arrival stack empty". Never dereferenced; real
/// waiter pointers are distinguishable because their low bit is clear.
const LOCKED_EMPTY: *mut WaitElement = 1 as *mut WaitElement;

/// Strips the tag, coercing [`LOCKED_EMPTY`] to null and leaving real waiter
/// pointers untouched.
fn untagged(tail: *mut WaitElement) -> *mut WaitElement {
    ((tail as usize) & !1) as *mut WaitElement
}

/// This thread's wait element. Ownership never migrates (later arrivals and
/// eos markers only compare or store into the gate), so it lives inline in
/// thread-local storage.
struct NodeSlot {
    element: CachePadded<WaitElement>,
    held: Cell<bool>,
}

impl NodeSlot {
    const fn new() -> Self {
        Self { element: CachePadded::new(WaitElement::new()), held: Cell::new(false) }
    }

    fn as_ptr(&self) -> *mut WaitElement {
        (&*self.element as *const WaitElement).cast_mut()
    }
}

std::thread_local! {
    static NODE: NodeSlot = const { NodeSlot::new() };
}

/// Message for nested acquisitions, which would push this thread's wait
/// element twice.
const HELD: &str = "a thread may hold at most one reciprocating lock at any time";

/// A raw mutual exclusion point implementing the reciprocating lock
/// protocol.
///
/// # Example
///
/// ```
/// use handoff::reciprocating::ReciprocatingLock;
/// use handoff::lock::RawLock;
///
/// let lock: ReciprocatingLock = ReciprocatingLock::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct ReciprocatingLock<R = Yield> {
    arrivals: AtomicPtr<WaitElement>,
    marker: PhantomData<R>,
}

// SAFETY: The lock owns no thread-affine state; all shared mutation goes
// through the atomics.
unsafe impl<R> Send for ReciprocatingLock<R> {}
unsafe impl<R> Sync for ReciprocatingLock<R> {}

/// Proof of one held reciprocating acquisition: the successor to hand the
/// segment to, the end-of-segment marker, and the caller's own element.
#[derive(Debug)]
#[must_use = "a token must be passed back to `release`, or the lock is never released"]
pub struct ReciprocatingToken {
    succ: *mut WaitElement,
    eos: *mut WaitElement,
    element: *mut WaitElement,
}

impl<R> ReciprocatingLock<R> {
    /// Creates a new, unlocked reciprocating lock.
    pub const fn new() -> Self {
        let arrivals = AtomicPtr::new(ptr::null_mut());
        Self { arrivals, marker: PhantomData }
    }

    /// Returns `true` if some thread currently holds or waits on this lock.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        !self.arrivals.load(Relaxed).is_null()
    }
}

impl<R> Default for ReciprocatingLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for ReciprocatingLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReciprocatingLock").field("locked", &self.is_locked()).finish()
    }
}

// SAFETY: The `arrivals` exchange totally orders arrivals; a waiter enters
// the critical section only after the previous holder's release store to its
// gate, and detached segments are drained under the lock they were pushed
// against.
unsafe impl<R: Relax> RawLock for ReciprocatingLock<R> {
    type Token = ReciprocatingToken;

    /// # Panics
    ///
    /// Panics if this thread already holds a reciprocating lock (the
    /// per-thread wait element cannot be pushed twice).
    fn acquire(&self) -> ReciprocatingToken {
        NODE.with(|slot| {
            assert!(!slot.held.replace(true), "{}", HELD);
            let element = slot.as_ptr();
            slot.element.gate.store(ptr::null_mut(), Relaxed);

            let mut token = ReciprocatingToken { succ: ptr::null_mut(), eos: element, element };

            let tail = self.arrivals.swap(element, AcqRel);
            debug_assert_ne!(tail, element);
            if !tail.is_null() {
                token.succ = untagged(tail);
                debug_assert_ne!(token.succ, element);

                // Contended: wait for the current holder's lineage to hand
                // us the lock, along with our segment's end marker.
                let mut relax = R::new();
                token.eos = loop {
                    let eos = slot.element.gate.load(Acquire);
                    if !eos.is_null() {
                        break eos;
                    }
                    relax.relax();
                };

                debug_assert_ne!(token.eos, element);
                if token.succ == token.eos {
                    // Our recorded successor is the end of the segment: the
                    // segment is fully drained once we run, so collapse to
                    // the locked-empty encoding.
                    token.succ = ptr::null_mut();
                    token.eos = LOCKED_EMPTY;
                }
            }

            debug_assert!(!token.eos.is_null());
            token
        })
    }

    unsafe fn release(&self, token: ReciprocatingToken) {
        debug_assert!(!token.eos.is_null());

        if !token.succ.is_null() {
            debug_assert_ne!(token.eos, token.element);
            // Hand the whole accumulated segment over in one gate store.
            // SAFETY: The successor's element outlives its wait on this
            // store; we are the unique thread entitled to write this gate.
            unsafe { &(*token.succ).gate }.store(token.eos, Release);
            NODE.with(|slot| slot.held.set(false));
            return;
        }

        // No successor in our segment: either the stack is empty and we
        // return the lock to idle...
        debug_assert!(token.eos == LOCKED_EMPTY || token.eos == token.element);
        if self.arrivals.compare_exchange(token.eos, ptr::null_mut(), AcqRel, Acquire).is_ok() {
            NODE.with(|slot| slot.held.set(false));
            return;
        }

        // ...or new waiters arrived meanwhile: detach the whole stack,
        // leaving the lock marked held with no published tail, and wake the
        // newest arrival with our end-of-segment marker.
        let head = self.arrivals.swap(LOCKED_EMPTY, AcqRel);
        debug_assert!(!head.is_null());
        debug_assert_ne!(head, LOCKED_EMPTY);
        debug_assert_ne!(head, token.element);
        // SAFETY: `head` is a waiter element pushed by a live arrival that
        // cannot proceed before this store.
        unsafe { &(*head).gate }.store(token.eos, Release);
        NODE.with(|slot| slot.held.set(false));
    }
}

#[cfg(test)]
mod test {
    use super::ReciprocatingLock;
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<ReciprocatingLock>();
    }

    #[test]
    fn raw_acquire_release() {
        tests::raw_acquire_release::<ReciprocatingLock>();
    }

    #[test]
    fn lots_and_lots() {
        tests::lots_and_lots::<ReciprocatingLock>();
    }

    #[test]
    fn two_threads_alternating() {
        tests::ping_pong::<ReciprocatingLock>();
    }

    #[test]
    fn stack_drains_fully() {
        // Three or more concurrent arrivals form a segment that must drain
        // completely before the lock can go idle again.
        tests::exact_count::<ReciprocatingLock>(4, 25_000);
    }
}
