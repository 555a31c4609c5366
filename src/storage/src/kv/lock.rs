// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A multi-reader/single-writer lock with the fairness plain
//! `parking_lot::RwLock` does not promise (spec §5, DESIGN.md Open
//! Question 3): a writer that starts while a reader is open blocks until
//! every reader open at that moment finishes, and once a writer is
//! waiting, later readers queue behind it rather than starving it.

use std::sync::{Arc, Condvar, Mutex};

/// `readers > 0` means that many read transactions are open; `readers ==
/// WRITER` means a write transaction holds the lock exclusively.
struct State {
    readers: usize,
    writer_waiting: bool,
}

const WRITER: usize = usize::MAX;

pub struct TxnLock {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Default for TxnLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer_waiting: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until no writer holds or waits for the lock, then registers
    /// one more reader. Takes `self` by `Arc` so the returned guard can
    /// outlive the call that created it — a transaction carries its guard
    /// for an arbitrary lifetime, not just the duration of `begin`.
    pub fn acquire_read(self: &Arc<Self>) -> ReadGuard {
        let mut state = self.state.lock().unwrap();
        while state.readers == WRITER || state.writer_waiting {
            state = self.condvar.wait(state).unwrap();
        }
        state.readers += 1;
        ReadGuard { lock: self.clone() }
    }

    /// Blocks until every existing reader has released and no other
    /// writer is active, then takes the lock exclusively. Declares intent
    /// to write immediately, so new readers queue behind this call rather
    /// than cutting in front of it.
    pub fn acquire_write(self: &Arc<Self>) -> WriteGuard {
        let mut state = self.state.lock().unwrap();
        state.writer_waiting = true;
        while state.readers != 0 {
            state = self.condvar.wait(state).unwrap();
        }
        state.writer_waiting = false;
        state.readers = WRITER;
        WriteGuard { lock: self.clone() }
    }

    fn release_read(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.readers > 0 && state.readers != WRITER);
        state.readers -= 1;
        if state.readers == 0 {
            self.condvar.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.readers, WRITER);
        state.readers = 0;
        self.condvar.notify_all();
    }
}

pub struct ReadGuard {
    lock: Arc<TxnLock>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard {
    lock: Arc<TxnLock>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn readers_coexist() {
        let lock = Arc::new(TxnLock::new());
        let g1 = lock.acquire_read();
        let g2 = lock.acquire_read();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn writer_waits_for_reader() {
        let lock = Arc::new(TxnLock::new());
        let order = Arc::new(AtomicUsize::new(0));

        let read_guard = lock.acquire_read();
        let lock2 = lock.clone();
        let order2 = order.clone();
        let handle = thread::spawn(move || {
            let _w = lock2.acquire_write();
            let prev = order2.fetch_add(1, Ordering::SeqCst);
            assert_eq!(prev, 1, "writer must not acquire before reader releases");
        });

        thread::sleep(Duration::from_millis(20));
        order.store(1, Ordering::SeqCst);
        drop(read_guard);
        handle.join().unwrap();
    }

    #[test]
    fn waiting_writer_blocks_new_readers() {
        let lock = Arc::new(TxnLock::new());
        let first_reader = lock.acquire_read();

        let lock2 = lock.clone();
        let writer_done = Arc::new(AtomicUsize::new(0));
        let writer_done2 = writer_done.clone();
        let writer = thread::spawn(move || {
            let _w = lock2.acquire_write();
            writer_done2.store(1, Ordering::SeqCst);
        });

        // give the writer time to register as waiting.
        thread::sleep(Duration::from_millis(20));
        drop(first_reader);
        writer.join().unwrap();
        assert_eq!(writer_done.load(Ordering::SeqCst), 1);

        // after the writer finishes, a new reader can proceed.
        let _r = lock.acquire_read();
    }
}
