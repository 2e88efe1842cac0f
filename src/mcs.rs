//! MCS queue lock.
//!
//! The classic list-based queue lock of [Mellor-Crummey and Scott]: each
//! waiter spins on a flag in its *own* node, and the releasing thread
//! performs a single release store into its successor's node to hand the
//! lock over. Like CLH this is FIFO and spins only on locally-accessible
//! memory; unlike CLH the nodes never migrate, so each thread's node can
//! live inline in its thread-local storage.
//!
//! The one subtlety is on the release path: a releaser that sees no
//! successor must dequeue itself with a tail CAS, and on CAS failure wait
//! for the incoming waiter to finish linking in before signalling it.
//!
//! [Mellor-Crummey and Scott]: https://www.cs.rochester.edu/u/scott/papers/1991_TOCS_synch.pdf

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::sync::atomic::{AtomicBool, AtomicPtr};

use crossbeam_utils::CachePadded;

use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

/// A queue node: the link published to the successor and the flag its owner
/// spins on.
#[derive(Debug)]
struct Node {
    next: AtomicPtr<PaddedNode>,
    locked: AtomicBool,
}

type PaddedNode = CachePadded<Node>;

impl Node {
    const fn new() -> Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let locked = AtomicBool::new(false);
        Self { next, locked }
    }
}

/// This thread's MCS node. Ownership never migrates, so the node lives
/// inline in thread-local storage and dies with the thread.
struct NodeSlot {
    node: PaddedNode,
    held: Cell<bool>,
}

impl NodeSlot {
    const fn new() -> Self {
        Self { node: CachePadded::new(Node::new()), held: Cell::new(false) }
    }

    fn as_ptr(&self) -> *mut PaddedNode {
        (&self.node as *const PaddedNode).cast_mut()
    }
}

std::thread_local! {
    static NODE: NodeSlot = const { NodeSlot::new() };
}

/// Message for nested acquisitions, which would enqueue this thread's node
/// twice.
const HELD: &str = "a thread may hold at most one MCS lock at any time";

/// A raw mutual exclusion point implementing the MCS lock protocol.
///
/// # Example
///
/// ```
/// use handoff::mcs::McsLock;
/// use handoff::lock::RawLock;
///
/// let lock: McsLock = McsLock::new();
/// let token = lock.acquire();
/// // critical section
/// // SAFETY: the token came from `acquire` on this lock, on this thread.
/// unsafe { lock.release(token) };
/// ```
pub struct McsLock<R = Spin> {
    tail: AtomicPtr<PaddedNode>,
    marker: PhantomData<R>,
}

// SAFETY: The lock owns no thread-affine state; all shared mutation goes
// through the atomics.
unsafe impl<R> Send for McsLock<R> {}
unsafe impl<R> Sync for McsLock<R> {}

/// Proof of one held MCS acquisition: the caller's own enqueued node.
#[derive(Debug)]
#[must_use = "a token must be passed back to `release`, or the lock is never released"]
pub struct McsToken {
    node: *mut PaddedNode,
}

impl<R> McsLock<R> {
    /// Creates a new, unlocked MCS lock.
    pub const fn new() -> Self {
        let tail = AtomicPtr::new(ptr::null_mut());
        Self { tail, marker: PhantomData }
    }

    /// Returns `true` if some thread currently holds or waits on this lock.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Relaxed).is_null()
    }

    /// Dequeues `node` as the queue's tail, if it is in fact the tail.
    fn try_unlock(&self, node: *mut PaddedNode) -> bool {
        self.tail.compare_exchange(node, ptr::null_mut(), AcqRel, Acquire).is_ok()
    }
}

impl<R> Default for McsLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for McsLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McsLock").field("locked", &self.is_locked()).finish()
    }
}

// SAFETY: The tail exchange totally orders enqueues; a waiter enters the
// critical section only after its predecessor's release store to its flag.
unsafe impl<R: Relax> RawLock for McsLock<R> {
    type Token = McsToken;

    /// # Panics
    ///
    /// Panics if this thread already holds an MCS lock (the per-thread queue
    /// node cannot be enqueued twice).
    fn acquire(&self) -> McsToken {
        NODE.with(|slot| {
            assert!(!slot.held.replace(true), "{}", HELD);
            let node = slot.as_ptr();
            slot.node.next.store(ptr::null_mut(), Relaxed);
            slot.node.locked.store(true, Relaxed);

            let pred = self.tail.swap(node, AcqRel);
            if !pred.is_null() {
                // SAFETY: A predecessor node stays live until its owner has
                // observed our release store, which cannot have happened yet.
                unsafe { &(&*pred).next }.store(node, Release);
                let mut relax = R::new();
                while slot.node.locked.load(Acquire) {
                    relax.relax();
                }
            }
            McsToken { node }
        })
    }

    unsafe fn release(&self, token: McsToken) {
        // SAFETY: The token carries the node this thread enqueued in the
        // matching `acquire`; it stays live at least until this call returns.
        let node = unsafe { &*token.node };
        let mut succ = node.next.load(Acquire);
        if succ.is_null() {
            // No known successor: if we are still the tail, dequeue and go
            // idle.
            if self.try_unlock(token.node) {
                NODE.with(|slot| slot.held.set(false));
                return;
            }
            // A new waiter swapped the tail but has not published itself as
            // our successor yet. This window is tiny.
            let mut relax = R::new();
            loop {
                succ = node.next.load(Acquire);
                if !succ.is_null() {
                    break;
                }
                relax.relax();
            }
        }
        // SAFETY: Verified non-null above; the successor's node outlives its
        // wait on this store.
        unsafe { &(&*succ).locked }.store(false, Release);
        NODE.with(|slot| slot.held.set(false));
    }
}

#[cfg(test)]
mod test {
    use super::McsLock;
    use crate::test::tests;

    #[test]
    fn smoke() {
        tests::smoke::<McsLock>();
    }

    #[test]
    fn raw_acquire_release() {
        tests::raw_acquire_release::<McsLock>();
    }

    #[test]
    fn lots_and_lots() {
        tests::lots_and_lots::<McsLock>();
    }

    #[test]
    fn two_threads_alternating() {
        // Alternation drives the release path through the null-successor
        // branch (tail CAS) on nearly every round.
        tests::ping_pong::<McsLock>();
    }

    #[test]
    fn exact_operation_count() {
        // Yield while waiting so the test is well behaved when there are
        // more contenders than cores.
        tests::exact_count::<McsLock<crate::relax::Yield>>(8, 25_000);
    }
}
