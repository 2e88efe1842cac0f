//! Ticket lock augmented with a waiting array.
//!
//! A plain ticket lock makes every waiter spin on the single `grant`
//! counter, so each release invalidates one cache line in every waiting
//! core. The augmentation of [Dice and Kogan] splits the waiters: only the
//! thread next in line (within [`LONG_TERM_THRESHOLD`] of `grant`) spins on
//! `grant` itself, while all the distant waiters park on a slot of a hashed
//! waiting array, keyed by their ticket. A releaser bumps the sequence of
//! the slot where the waiter due in `threshold + 1` grants must be parked,
//! promoting exactly one long-term waiter to the short-term spin.
//!
//! Hash collisions in the array produce spurious wake-ups, which are
//! harmless: a woken waiter re-reads `grant` and goes back to waiting if its
//! turn has not come. Lost wake-ups cannot happen because the wake targets
//! the same slot function the parked waiter used.
//!
//! The waiting array is a single process-wide static shared by every
//! `TwaLock`, trading cross-lock interference (more spurious wake-ups) for a
//! fixed memory footprint.
//!
//! [Dice and Kogan]: https://arxiv.org/abs/1810.01573
//! [`LONG_TERM_THRESHOLD`]: TwaLock#structure

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::sync::atomic::{AtomicU32, AtomicU64};

use crossbeam_utils::CachePadded;

use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

/// Number of slots in the process-wide waiting array.
const WAITING_SLOTS: usize = 4096;

const _: () = assert!(WAITING_SLOTS.is_power_of_two());

/// Tickets within this distance of `grant` spin on `grant` directly; the
/// rest park in the waiting array.
const LONG_TERM_THRESHOLD: u64 = 1;

/// The process-wide waiting array. Each slot is a sequence counter on its
/// own cache line; waiters watch it for any change.
static WAITING: [CachePadded<AtomicU32>; WAITING_SLOTS] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY_SLOT: CachePadded<AtomicU32> = CachePadded::new(AtomicU32::new(0));
    [EMPTY_SLOT; WAITING_SLOTS]
};

/// Maps a ticket to its waiting slot: a 64-bit finalizer-style mix reduced
/// into the array.
fn slot_of(ticket: u64) -> &'static CachePadded<AtomicU32> {
    let mut x = ticket;
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    &WAITING[x as usize & (WAITING_SLOTS - 1)]
}

/// A raw mutual exclusion point implementing a ticket lock with a hashed
/// waiting array.
///
/// # Structure
///
/// Two cache-line-isolated counters: `next_ticket` dispenses tickets with a
/// relaxed fetch-add, `grant` names the ticket currently admitted. The
/// long-term threshold is `1`: only the immediate next waiter spins on
/// `grant`.
///
/// # Example
///
/// ```
/// use handoff::twa::TwaLock;
/// use handoff::lock::RawLock;
///
/// let lock: TwaLock = TwaLock::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct TwaLock<R = Spin> {
    next_ticket: CachePadded<AtomicU64>,
    grant: CachePadded<AtomicU64>,
    marker: PhantomData<R>,
}

// SAFETY: The lock owns no thread-affine state; all shared mutation goes
// through the atomics.
unsafe impl<R> Send for TwaLock<R> {}
unsafe impl<R> Sync for TwaLock<R> {}

/// Proof of one held ticket-lock acquisition: the granted ticket.
#[derive(Debug)]
#[must_use = "a token must be passed back to `release`, or the lock is never released"]
pub struct TwaToken {
    ticket: u64,
}

impl<R> TwaLock<R> {
    /// Creates a new, unlocked ticket lock.
    pub const fn new() -> Self {
        let next_ticket = CachePadded::new(AtomicU64::new(0));
        let grant = CachePadded::new(AtomicU64::new(0));
        Self { next_ticket, grant, marker: PhantomData }
    }
}

impl<R> Default for TwaLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for TwaLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let next_ticket = self.next_ticket.load(Relaxed);
        let grant = self.grant.load(Relaxed);
        f.debug_struct("TwaLock").field("next_ticket", &next_ticket).field("grant", &grant).finish()
    }
}

// SAFETY: Tickets are dispensed uniquely and admitted in order: a thread
// enters only once `grant` equals its ticket, and `grant` moves to the
// successor ticket by the holder's release store.
unsafe impl<R: Relax> RawLock for TwaLock<R> {
    type Token = TwaToken;

    fn acquire(&self) -> TwaToken {
        let ticket = self.next_ticket.fetch_add(1, Relaxed);

        let mut grant = self.grant.load(Acquire);
        if grant == ticket {
            return TwaToken { ticket };
        }

        let slot = slot_of(ticket);
        let mut sequence = slot.load(Relaxed);
        let mut relax = R::new();

        // Long-term wait: watch the slot's sequence for any change, keeping
        // an eye on the distance to `grant`. On a slot change (or once close
        // enough) re-evaluate.
        while ticket.wrapping_sub(grant) > LONG_TERM_THRESHOLD {
            while slot.load(Acquire) == sequence {
                relax.relax();
                grant = self.grant.load(Acquire);
                if ticket.wrapping_sub(grant) <= LONG_TERM_THRESHOLD {
                    break;
                }
            }
            sequence = slot.load(Relaxed);
            grant = self.grant.load(Acquire);
        }

        // Short-term wait: next in line, spin on `grant` itself.
        while grant != ticket {
            relax.relax();
            grant = self.grant.load(Acquire);
        }

        TwaToken { ticket }
    }

    unsafe fn release(&self, token: TwaToken) {
        let granted = token.ticket.wrapping_add(1);
        self.grant.store(granted, Release);

        // Promote the long-term waiter that parked for the ticket one
        // threshold past the new grant, if any. Colliding waiters re-check
        // `grant` and park again.
        let wakeup = granted.wrapping_add(LONG_TERM_THRESHOLD);
        slot_of(wakeup).fetch_add(1, Relaxed);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;

    use super::TwaLock;
    use crate::lock::RawLock;
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<TwaLock>();
    }

    #[test]
    fn raw_acquire_release() {
        tests::raw_acquire_release::<TwaLock>();
    }

    #[test]
    fn lots_and_lots() {
        tests::lots_and_lots::<TwaLock>();
    }

    #[test]
    fn grant_is_strictly_increasing() {
        // Enough threads that ticket distances exceed the long-term
        // threshold and waiters go through the waiting array.
        const THREADS: usize = 16;
        const ITERS: u64 = 2_000;

        let lock = Arc::new(TwaLock::<crate::relax::Yield>::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..ITERS {
                        let token = lock.acquire();
                        let grant = lock.grant.load(Relaxed);
                        assert!(grant > last || last == 0);
                        last = grant;
                        // SAFETY: token produced by this acquire.
                        unsafe { lock.release(token) };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.grant.load(Relaxed), THREADS as u64 * ITERS);
        assert_eq!(lock.next_ticket.load(Relaxed), THREADS as u64 * ITERS);
    }
}
