//! Lock selection by symbolic name.
//!
//! A benchmark harness names the lock it wants on the command line; this
//! module parses that name into a [`LockKind`] and routes a generic
//! operation to the concrete lock type through [`LockKind::dispatch`].
//! Parsing an unknown name fails before any lock is constructed.

use core::fmt;
use core::str::FromStr;

use crate::clh::ClhLock;
use crate::hapax::HapaxLock;
use crate::lock::RawLock;
use crate::mcs::McsLock;
use crate::native::NativeMutex;
use crate::reciprocating::ReciprocatingLock;
use crate::twa::TwaLock;

/// The set of lock variants a harness can select.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// The platform's native binary mutex ([`NativeMutex`]).
    Mutex,
    /// The stack-based segment-handoff lock ([`ReciprocatingLock`]).
    Reciprocating,
    /// The visible-waiter handoff lock ([`HapaxLock`]).
    Hapax,
    /// The MCS queue lock ([`McsLock`]).
    Mcs,
    /// The ticket lock with waiting array ([`TwaLock`]).
    Twa,
    /// The CLH queue lock ([`ClhLock`]).
    Clh,
}

impl LockKind {
    /// Every selectable kind, in parse order.
    pub const ALL: [LockKind; 6] = [
        LockKind::Mutex,
        LockKind::Reciprocating,
        LockKind::Hapax,
        LockKind::Mcs,
        LockKind::Twa,
        LockKind::Clh,
    ];

    /// The symbolic name this kind parses from.
    pub const fn as_str(self) -> &'static str {
        match self {
            LockKind::Mutex => "mutex",
            LockKind::Reciprocating => "reciprocating",
            LockKind::Hapax => "hapax",
            LockKind::Mcs => "mcs",
            LockKind::Twa => "twa",
            LockKind::Clh => "clh",
        }
    }

    /// Routes `selector` to the concrete lock type of this kind, with each
    /// algorithm's default relax policy.
    pub fn dispatch<S: Select>(self, selector: S) -> S::Output {
        match self {
            LockKind::Mutex => selector.select::<NativeMutex>(),
            LockKind::Reciprocating => selector.select::<ReciprocatingLock>(),
            LockKind::Hapax => selector.select::<HapaxLock>(),
            LockKind::Mcs => selector.select::<McsLock>(),
            LockKind::Twa => selector.select::<TwaLock>(),
            LockKind::Clh => selector.select::<ClhLock>(),
        }
    }
}

/// A generic operation over a yet-unknown lock type, resolved by
/// [`LockKind::dispatch`].
pub trait Select {
    /// The value the operation produces.
    type Output;

    /// Runs the operation against the selected lock type.
    fn select<L: RawLock + 'static>(self) -> Self::Output;
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised lock kind name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseLockKindError(());

impl fmt::Display for ParseLockKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown lock kind")
    }
}

impl std::error::Error for ParseLockKindError {}

impl FromStr for LockKind {
    type Err = ParseLockKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mutex" => Ok(LockKind::Mutex),
            "reciprocating" => Ok(LockKind::Reciprocating),
            "hapax" => Ok(LockKind::Hapax),
            "mcs" => Ok(LockKind::Mcs),
            "twa" => Ok(LockKind::Twa),
            "clh" => Ok(LockKind::Clh),
            _ => Err(ParseLockKindError(())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{LockKind, Select};
    use crate::lock::RawLock;

    #[test]
    fn round_trips() {
        for kind in LockKind::ALL {
            assert_eq!(kind.as_str().parse::<LockKind>(), Ok(kind));
            assert_eq!(kind.to_string().parse::<LockKind>(), Ok(kind));
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("foo".parse::<LockKind>().is_err());
        assert!("".parse::<LockKind>().is_err());
        assert!("MCS".parse::<LockKind>().is_err());
    }

    #[test]
    fn dispatches_every_kind() {
        struct OneRoundTrip;

        impl Select for OneRoundTrip {
            type Output = ();

            fn select<L: RawLock + 'static>(self) {
                let lock = L::default();
                let token = lock.acquire();
                // SAFETY: token produced by this acquire, on this thread.
                unsafe { lock.release(token) };
            }
        }

        for kind in LockKind::ALL {
            kind.dispatch(OneRoundTrip);
        }
    }
}
