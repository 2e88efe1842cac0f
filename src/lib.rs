//! A family of queue-based and token-based mutual exclusion locks, exposed
//! through one uniform acquire/release surface so a contention benchmark can
//! dispatch over them by name.
//!
//! Every variant is a busy-waiting lock built from explicit atomic hand-off:
//!
//! - [`clh`]: the CLH queue lock, spinning on the predecessor's node and
//!   adopting it on release;
//! - [`mcs`]: the MCS queue lock, spinning on the thread's own node;
//! - [`twa`]: a ticket lock augmented with a hashed waiting array, so only
//!   the next thread in line spins on the grant counter;
//! - [`hapax`]: a visible-waiter lock trading in single-use 64-bit
//!   identities, with a hashed parking-slot fast path and a global
//!   fallback;
//! - [`reciprocating`]: a stack-based lock handing entire segments of
//!   accumulated waiters from holder to holder;
//! - [`native`]: the platform's binary mutex, the baseline the others are
//!   measured against.
//!
//! The common surface is [`lock::RawLock`]: `acquire` returns an opaque
//! token, `release` consumes it. [`kind::LockKind`] parses the symbolic
//! names `mutex`, `reciprocating`, `hapax`, `mcs`, `twa` and `clh` and
//! dispatches a generic operation to the chosen type. For ordinary
//! data-protection use there is the RAII wrapper [`mutex::Mutex`].
//!
//! # Spinlock use cases
//!
//! It is noteworthy to mention that [spinlocks are usually not what you
//! want]. The majority of use cases are well covered by OS-based mutexes
//! like [`std::sync::Mutex`], which park the waiting thread and free the
//! processor to work on something else.
//!
//! Spinlocks are only efficient in very few circumstances where the overhead
//! of context switching or process rescheduling are greater than busy
//! waiting for very short periods, or when studying the contention behaviour
//! of the hand-off protocols themselves, which is what this crate exists
//! for: a thread in `acquire` consumes a CPU core until it obtains the lock.
//!
//! # Waiting policies
//!
//! Each lock is generic over a [`relax::Relax`] policy applied in its wait
//! loops, defaulting to the policy the algorithm was designed around:
//! pause-hinted spinning for CLH, MCS and TWA, yielding for Hapax and
//! Reciprocating.
//!
//! # Example
//!
//! ```
//! use handoff::kind::LockKind;
//! use handoff::lock::RawLock;
//! use handoff::mutex::Mutex;
//!
//! // By name, the way a benchmark harness selects a lock:
//! let kind: LockKind = "mcs".parse().unwrap();
//! assert_eq!(kind, LockKind::Mcs);
//!
//! // Directly, protecting data:
//! let counter = Mutex::<u64, handoff::mcs::McsLock>::new(0);
//! *counter.lock() += 1;
//! assert_eq!(counter.into_inner(), 1);
//! ```
//!
//! [spinlocks are usually not what you want]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::inline_always)]
#![allow(clippy::doc_markdown)]
#![warn(rust_2021_compatibility)]
#![warn(missing_docs)]

pub mod clh;
pub mod hapax;
pub mod kind;
pub mod lock;
pub mod mcs;
pub mod mutex;
pub mod native;
pub mod reciprocating;
pub mod relax;
pub mod twa;

#[cfg(test)]
pub(crate) mod test;
