//! CLH queue lock.
//!
//! A List-Based Queuing Lock in which each thread spins on its
//! *predecessor's* node: the tail pointer always designates the most recently
//! enqueued waiter, and enqueueing is a single tail exchange. The main
//! properties of this mechanism are:
//!
//! - guarantees FIFO ordering of lock acquisitions;
//! - spins on locally-accessible flag variables only;
//! - requires a small constant amount of space per lock; and
//! - works equally well (requiring only O(1) network transactions per lock
//!   acquisition) on machines with and without coherent caches.
//!
//! The defining CLH trick is node rotation: on release a thread abandons the
//! node its successor is spinning on and adopts its predecessor's node for
//! its own next acquisition. Nodes therefore migrate between threads, which
//! is why they are heap allocated and owned by whoever currently holds them
//! (a thread's local slot, or the lock itself for the node sitting at the
//! tail of an idle queue).
//!
//! This algorithm was independently introduced by [Craig] and
//! [Magnussen, Landin, and Hagersten] papers.
//!
//! [Craig]: https://dada.cs.washington.edu/research/tr/1993/02/UW-CSE-93-02-02.pdf
//! [Magnussen, Landin, and Hagersten]: https://www2.it.uu.se/research/group/uart/pub/magnusson_1994_jan/magnusson_1994_jan.pdf

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::sync::atomic::{AtomicBool, AtomicPtr};

use crossbeam_utils::CachePadded;

use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

/// A queue node: one cache line holding the flag a successor spins on.
#[derive(Debug)]
struct Node {
    locked: AtomicBool,
}

type PaddedNode = CachePadded<Node>;

impl Node {
    /// Allocates a new, unlocked queue node and leaks it.
    ///
    /// Ownership of the allocation travels with the raw pointer: through the
    /// thread-local slot, the queue, and finally whichever of [`NodeSlot`] or
    /// [`ClhLock`] frees it.
    fn unlocked() -> *mut PaddedNode {
        let locked = AtomicBool::new(false);
        Box::into_raw(Box::new(CachePadded::new(Node { locked })))
    }
}

/// This thread's resting CLH node, lazily allocated on first acquire.
///
/// The slot holds exactly one node while the thread is outside of any CLH
/// critical section. During an acquisition the node is enqueued, and the slot
/// is refilled at release time with the predecessor's node.
struct NodeSlot {
    node: Cell<*mut PaddedNode>,
    held: Cell<bool>,
}

impl NodeSlot {
    const fn empty() -> Self {
        Self { node: Cell::new(core::ptr::null_mut()), held: Cell::new(false) }
    }

    /// Returns this thread's node, allocating it on first use.
    fn get_or_init(&self) -> *mut PaddedNode {
        let mut node = self.node.get();
        if node.is_null() {
            node = Node::unlocked();
            self.node.set(node);
        }
        node
    }
}

impl Drop for NodeSlot {
    fn drop(&mut self) {
        let node = self.node.get();
        if !node.is_null() {
            // SAFETY: The slot owns the node it holds at rest. At thread exit
            // no acquisition is in flight, so no other thread can reach this
            // allocation anymore: successors only ever touch nodes that were
            // relinquished to them by a release.
            drop(unsafe { Box::from_raw(node) });
        }
    }
}

std::thread_local! {
    static NODE: NodeSlot = const { NodeSlot::empty() };
}

/// Message for nested acquisitions, which would enqueue this thread's node
/// twice.
const HELD: &str = "a thread may hold at most one CLH lock at any time";

/// A raw mutual exclusion point implementing the CLH lock protocol.
///
/// # Example
///
/// ```
/// use handoff::clh::ClhLock;
/// use handoff::lock::RawLock;
///
/// let lock: ClhLock = ClhLock::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct ClhLock<R = Spin> {
    tail: AtomicPtr<PaddedNode>,
    marker: PhantomData<R>,
}

// SAFETY: The lock owns no thread-affine state; all shared mutation goes
// through the atomics.
unsafe impl<R> Send for ClhLock<R> {}
unsafe impl<R> Sync for ClhLock<R> {}

/// Proof of one held CLH acquisition: the predecessor's node, to be adopted
/// at release time.
#[derive(Debug)]
#[must_use = "a token must be passed back to `release`, or the lock is never released"]
pub struct ClhToken {
    pred: *mut PaddedNode,
}

impl<R> ClhLock<R> {
    /// Creates a new, unlocked CLH lock.
    ///
    /// Allocates the sentinel node the first acquirer will spin on (already
    /// unlocked, so that spin falls through immediately).
    pub fn new() -> Self {
        let tail = AtomicPtr::new(Node::unlocked());
        Self { tail, marker: PhantomData }
    }
}

impl<R> Default for ClhLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Drop for ClhLock<R> {
    fn drop(&mut self) {
        // At drop time the queue must be quiescent, so the tail points at the
        // one node the lock still owns: the sentinel, or the node abandoned
        // by the last release.
        let tail = *self.tail.get_mut();
        // SAFETY: The tail is never null and always points at a live Box
        // allocation; every other node has been adopted by some thread's
        // slot, which frees it on thread exit.
        drop(unsafe { Box::from_raw(tail) });
    }
}

impl<R> fmt::Debug for ClhLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClhLock").finish_non_exhaustive()
    }
}

// SAFETY: The tail exchange totally orders enqueues, and each thread waits
// for its unique predecessor's release store before entering the critical
// section.
unsafe impl<R: Relax> RawLock for ClhLock<R> {
    type Token = ClhToken;

    /// # Panics
    ///
    /// Panics if this thread already holds a CLH lock (the per-thread queue
    /// node cannot be enqueued twice).
    fn acquire(&self) -> ClhToken {
        NODE.with(|slot| {
            assert!(!slot.held.replace(true), "{}", HELD);
            let node = slot.get_or_init();
            // SAFETY: Until the exchange below publishes it, the node is
            // owned by this thread; afterwards other threads only load its
            // `locked` flag.
            unsafe { &(&*node).locked }.store(true, Relaxed);
            let pred = self.tail.swap(node, AcqRel);
            debug_assert!(!pred.is_null());
            let mut relax = R::new();
            // SAFETY: The predecessor node stays allocated until this thread
            // adopts it: its previous owner released it to us and will never
            // touch it again.
            while unsafe { &(&*pred).locked }.load(Acquire) {
                relax.relax();
            }
            ClhToken { pred }
        })
    }

    unsafe fn release(&self, token: ClhToken) {
        NODE.with(|slot| {
            let node = slot.node.get();
            debug_assert!(!node.is_null());
            debug_assert!(!token.pred.is_null());
            // SAFETY: This thread enqueued `node` in the matching `acquire`.
            // The release store is the last access we ever make to it; from
            // here on it belongs to our successor.
            unsafe { &(&*node).locked }.store(false, Release);
            slot.node.set(token.pred);
            slot.held.set(false);
        });
    }
}

#[cfg(test)]
mod test {
    use super::ClhLock;
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<ClhLock>();
    }

    #[test]
    fn raw_acquire_release() {
        tests::raw_acquire_release::<ClhLock>();
    }

    #[test]
    fn lots_and_lots() {
        tests::lots_and_lots::<ClhLock>();
    }

    #[test]
    fn two_threads_alternating() {
        // Node rotation must survive strict alternation, where every
        // acquisition has a predecessor from the other thread.
        tests::ping_pong::<ClhLock>();
    }

    #[test]
    fn uncontended_counter() {
        tests::sequential_counter::<ClhLock>(100_000);
    }
}
