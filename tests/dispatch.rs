//! Name parsing and dispatcher behaviour, over the full kind set.

use std::sync::Arc;
use std::thread;

use handoff::kind::{LockKind, Select};
use handoff::lock::RawLock;
use handoff::mutex::Mutex;

#[test]
fn parse_accepts_every_known_name() {
    let cases = [
        ("mutex", LockKind::Mutex),
        ("reciprocating", LockKind::Reciprocating),
        ("hapax", LockKind::Hapax),
        ("mcs", LockKind::Mcs),
        ("twa", LockKind::Twa),
        ("clh", LockKind::Clh),
    ];
    for (name, kind) in cases {
        assert_eq!(name.parse::<LockKind>(), Ok(kind));
        assert_eq!(kind.as_str(), name);
    }
}

#[test]
fn parse_rejects_unknown_names() {
    for name in ["foo", "", "MUTEX", "mcs ", "clh2"] {
        assert!(name.parse::<LockKind>().is_err(), "{name:?} should not parse");
    }
}

#[test]
fn all_covers_the_parse_set() {
    assert_eq!(LockKind::ALL.len(), 6);
    for kind in LockKind::ALL {
        assert_eq!(kind.as_str().parse::<LockKind>(), Ok(kind));
    }
}

/// Runs a small contended counter workload against whichever lock type the
/// dispatcher picks, the way the benchmark harness drives a run.
struct CountedRun {
    threads: usize,
    iters: u64,
}

impl Select for CountedRun {
    type Output = u64;

    fn select<L: RawLock + 'static>(self) -> u64 {
        let Self { threads, iters } = self;
        let counter = Arc::new(Mutex::<u64, L>::new(0));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..iters {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let count = *counter.lock();
        count
    }
}

#[test]
fn dispatch_runs_the_selected_kind() {
    for kind in LockKind::ALL {
        let run = CountedRun { threads: 2, iters: 1_000 };
        assert_eq!(kind.dispatch(run), 2_000, "kind {kind} lost updates");
    }
}
