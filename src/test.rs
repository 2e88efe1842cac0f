//! Shared test scenarios, reused by every lock variant's test module.

pub(crate) mod tests {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use crate::lock::RawLock;
    use crate::mutex::Mutex;

    // Test suite from the Rust's Mutex implementation with minor modifications
    // since the API is not compatible with this crate implementation and some
    // new tests as well.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    pub fn smoke<L: RawLock>() {
        let mutex = Mutex::<u32, L>::new(1);
        drop(mutex.lock());
        drop(mutex.lock());
    }

    /// Sequential acquire/release pairs, straight on the raw surface: no
    /// predecessor, no slot use, no contended path.
    pub fn raw_acquire_release<L: RawLock>() {
        let lock = L::default();
        for _ in 0..100 {
            let token = lock.acquire();
            // SAFETY: token produced by this acquire, on this thread.
            unsafe { lock.release(token) };
        }
    }

    /// A long single-threaded run; the final count proves every pair
    /// matched.
    pub fn sequential_counter<L: RawLock>(iters: u64) {
        let mutex = Mutex::<u64, L>::new(0);
        for _ in 0..iters {
            *mutex.lock() += 1;
        }
        assert_eq!(mutex.into_inner(), iters);
    }

    pub fn lots_and_lots<L: RawLock + 'static>() {
        const ITERS: u32 = 1000;
        const CONCURRENCY: u32 = 3;

        fn inc<L: RawLock>(data: &Mutex<u32, L>) {
            for _ in 0..ITERS {
                *data.lock() += 1;
            }
        }

        let data = Arc::new(Mutex::<u32, L>::new(0));

        let (tx, rx) = channel();
        for _ in 0..CONCURRENCY {
            let data1 = Arc::clone(&data);
            let tx2 = tx.clone();
            thread::spawn(move || {
                inc(&data1);
                tx2.send(()).unwrap();
            });
            let data2 = Arc::clone(&data);
            let tx2 = tx.clone();
            thread::spawn(move || {
                inc(&data2);
                tx2.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..2 * CONCURRENCY {
            rx.recv().unwrap();
        }
        assert_eq!(*data.lock(), ITERS * CONCURRENCY * 2);
    }

    /// Exactly two contenders, so the lock alternates between threads on
    /// nearly every acquisition.
    pub fn ping_pong<L: RawLock + 'static>() {
        exact_count::<L>(2, 10_000);
    }

    /// Mutual exclusion as arithmetic: `threads * iters` non-atomic
    /// increments must all survive.
    pub fn exact_count<L: RawLock + 'static>(threads: usize, iters: u64) {
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
        assert_eq!(*counter.lock(), threads as u64 * iters);
    }
}
