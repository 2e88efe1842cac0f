//! Hapax visible-waiter handoff lock.
//!
//! Arrivals are totally ordered by an exchange on a single `arrive` word,
//! like the tail exchange of a queue lock, but instead of queue nodes the
//! protocol trades in *hapax identities*: 64-bit values unique to one
//! (thread, acquisition) pair, never zero, never reused. The arriving thread
//! learns its predecessor's identity from the exchange and then makes itself
//! a *visible waiter* by planting that identity in a hashed parking slot.
//! The releaser clears the slot holding its own identity, waking exactly the
//! waiter that parked for it; a global `depart` word is the fallback
//! signalling path whenever the slot protocol races or collides.
//!
//! Because the identity doubles as the slot sentinel, every race in the
//! handoff window is decided by a single 64-bit compare-and-swap. The
//! visible-waiter technique follows the compact-lock line of [Dice and
//! Kogan]; the slot array is process-wide and salted with the lock address.
//!
//! [Dice and Kogan]: https://arxiv.org/abs/2102.03863

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::lock::RawLock;
use crate::relax::{Relax, Yield};

/// Number of slots in the process-wide visible-waiter array.
const WAITING_SLOTS: usize = 4096;

const _: () = assert!(WAITING_SLOTS.is_power_of_two());

/// Identity values are handed out to threads in blocks of this size, so the
/// hot path touches no shared state except once per block.
const BLOCK: u64 = 1 << 16;

/// The process-wide visible-waiter array. Zero means empty.
static WAITING: [CachePadded<AtomicU64>; WAITING_SLOTS] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY_SLOT: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
    [EMPTY_SLOT; WAITING_SLOTS]
};

/// Dispenses the high 48 bits ("zone") of each thread's identity block.
static BLOCK_ALLOCATOR: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));

std::thread_local! {
    static PRIVATE_HAPAX: Cell<u64> = const { Cell::new(0) };
}

/// Produces a fresh hapax identity: unique to this thread, this lock and
/// this lock-unlock episode, and never zero.
///
/// The high 48 bits encode the thread's current zone, the low 16 a
/// sub-sequence the thread allocates from locally. Exhausting a block (or
/// first use, since thread storage starts at zero) reprovisions from the
/// process-wide allocator.
fn next_hapax() -> u64 {
    PRIVATE_HAPAX.with(|private| {
        let mut hapax = private.get();
        private.set(hapax.wrapping_add(1));
        if hapax % BLOCK == 0 {
            hapax = BLOCK_ALLOCATOR.fetch_add(1, Relaxed) + 1;
            hapax <<= 16;
            private.set(hapax + 1);
        }
        debug_assert_ne!(hapax, 0);
        hapax
    })
}

/// A raw mutual exclusion point implementing the hapax visible-waiter
/// protocol.
///
/// # Example
///
/// ```
/// use handoff::hapax::HapaxLock;
/// use handoff::lock::RawLock;
///
/// let lock: HapaxLock = HapaxLock::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct HapaxLock<R = Yield> {
    /// Ingress stamp: identity of the most recent arrival.
    arrive: CachePadded<AtomicU64>,
    /// Egress stamp: identity of the most recent departure that found no
    /// visible waiter.
    depart: CachePadded<AtomicU64>,
    marker: PhantomData<R>,
}

// SAFETY: The lock owns no thread-affine state; all shared mutation goes
// through the atomics.
unsafe impl<R> Send for HapaxLock<R> {}
unsafe impl<R> Sync for HapaxLock<R> {}

/// Proof of one held hapax acquisition: the single-use identity consumed by
/// the matching release.
#[derive(Debug)]
#[must_use = "a token must be passed back to `release`, or the lock is never released"]
pub struct HapaxToken {
    hapax: u64,
}

impl<R> HapaxLock<R> {
    /// Creates a new, unlocked hapax lock.
    pub const fn new() -> Self {
        let arrive = CachePadded::new(AtomicU64::new(0));
        let depart = CachePadded::new(AtomicU64::new(0));
        Self { arrive, depart, marker: PhantomData }
    }

    /// Maps an identity to its parking slot, salting with the lock address
    /// so distinct locks spread over the array.
    fn slot_of(&self, identity: u64) -> &'static CachePadded<AtomicU64> {
        let salt = self as *const Self as usize as u32;
        let ix = salt.wrapping_add((identity >> 16) as u32).wrapping_mul(17);
        &WAITING[ix as usize & (WAITING_SLOTS - 1)]
    }
}

impl<R> Default for HapaxLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for HapaxLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrive = self.arrive.load(Relaxed);
        let depart = self.depart.load(Relaxed);
        f.debug_struct("HapaxLock").field("arrive", &arrive).field("depart", &depart).finish()
    }
}

// SAFETY: The `arrive` exchange totally orders arrivals; an arrival that
// found a live predecessor proceeds only once that predecessor has signalled
// departure through the slot or through `depart`.
unsafe impl<R: Relax> RawLock for HapaxLock<R> {
    type Token = HapaxToken;

    fn acquire(&self) -> HapaxToken {
        let hapax = next_hapax();
        let pred = self.arrive.swap(hapax, AcqRel);
        debug_assert_ne!(pred, hapax);

        if self.depart.load(Acquire) != pred {
            let slot = self.slot_of(pred);
            let mut relax = R::new();

            if slot.compare_exchange(0, pred, AcqRel, Acquire).is_err() {
                // Collision on the visible-waiter slot; wait via the global
                // depart value.
                while self.depart.load(Acquire) != pred {
                    relax.relax();
                }
            } else if self.depart.load(Acquire) == pred {
                // Raced with a release that missed our parked identity;
                // release the slot and proceed.
                let _ = slot.compare_exchange(pred, 0, AcqRel, Acquire);
            } else {
                // Preferred path: parked visibly, wait to be handed over
                // through this slot.
                while slot.load(Acquire) == pred {
                    relax.relax();
                }
            }
        }

        HapaxToken { hapax }
    }

    unsafe fn release(&self, token: HapaxToken) {
        let hapax = token.hapax;
        debug_assert_ne!(hapax, 0);

        // A successor that parked for us is waiting on this slot; clearing
        // it is the entire handoff.
        let slot = self.slot_of(hapax);
        if slot.compare_exchange(hapax, 0, AcqRel, Acquire).is_ok() {
            return;
        }

        // No visible waiter: publish departure globally, then clear the slot
        // once more in case a waiter parked between the two steps.
        self.depart.store(hapax, Release);
        let _ = slot.compare_exchange(hapax, 0, AcqRel, Acquire);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering::Acquire;
    use std::sync::Arc;

    use super::{next_hapax, HapaxLock};
    use crate::lock::RawLock;
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<HapaxLock>();
    }

    #[test]
    fn raw_acquire_release() {
        tests::raw_acquire_release::<HapaxLock>();
    }

    #[test]
    fn lots_and_lots() {
        tests::lots_and_lots::<HapaxLock>();
    }

    #[test]
    fn identities_are_unique_and_nonzero() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 * (1 << 16) {
            let hapax = next_hapax();
            assert_ne!(hapax, 0);
            assert!(seen.insert(hapax));
        }
    }

    #[test]
    fn stamps_match_at_quiescence() {
        // With a short critical section and many threads the handoff window
        // races are exercised; once every thread has left, the last release
        // cannot have found a visible waiter, so it must have published its
        // departure globally.
        const THREADS: usize = 32;
        const ITERS: usize = 1_000;

        let lock = Arc::new(HapaxLock::<crate::relax::Yield>::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..ITERS {
                        let token = lock.acquire();
                        // SAFETY: token produced by this acquire.
                        unsafe { lock.release(token) };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.arrive.load(Acquire), lock.depart.load(Acquire));
    }
}
