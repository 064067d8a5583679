//! # Monitor
//!
//! A lock paired with a condition: lock, wait (forever or with a
//! millisecond timeout), notify. Every waiter waits on the condition
//! associated with this specific lock; `notify` wakes at least one waiter;
//! a timed wait returns on timeout without error.

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct Monitor<T> {
    lock: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Monitor<T> {
        Monitor { lock: Mutex::new(value), cond: Condvar::new() }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock()
    }

    /// Block until notified. `ms < 0` waits forever; otherwise the wait
    /// returns after at most `ms` milliseconds.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>, ms: i64) {
        if ms < 0 {
            self.cond.wait(guard);
        } else {
            self.cond
                .wait_for(guard, Duration::from_millis(ms as u64));
        }
    }

    pub fn notify(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
