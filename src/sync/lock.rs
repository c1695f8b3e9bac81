// PingZee - Resource Lock
//
// Binary ownership token per hardware resource. A caller that needs several
// messages to reach the worker back to back takes the lock first. Acquire is
// bounded; running into the bound means a wedged peripheral and halts.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::LOCK_TIMEOUT;
use crate::fault::general_fault;

pub struct ResourceLock {
    name: &'static str,
    timeout: Duration,
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// Proof of ownership. Dropping it releases the lock; it cannot leave the
/// thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a ResourceLock,
    _not_send: PhantomData<*const ()>,
}

impl ResourceLock {
    pub fn new(name: &'static str) -> Self {
        Self::with_timeout(name, LOCK_TIMEOUT)
    }

    pub fn with_timeout(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            holder: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    fn holder(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock, halting if it is not free within the bound.
    #[track_caller]
    pub fn acquire(&self) -> LockGuard<'_> {
        match self.try_acquire_for(self.timeout) {
            Some(guard) => guard,
            None => general_fault(self.name),
        }
    }

    pub fn try_acquire_for(&self, timeout: Duration) -> Option<LockGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let me = thread::current().id();
        let mut holder = self.holder();
        while holder.is_some() {
            let left = deadline.checked_duration_since(Instant::now())?;
            if left.is_zero() {
                return None;
            }
            holder = self
                .released
                .wait_timeout(holder, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *holder = Some(me);
        Some(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    #[track_caller]
    fn release(&self) {
        let mut holder = self.holder();
        if *holder != Some(thread::current().id()) {
            drop(holder);
            general_fault(self.name);
        }
        *holder = None;
        drop(holder);
        self.released.notify_one();
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn guard_releases_on_drop() {
        let lock = ResourceLock::new("bus");
        {
            let _guard = lock.acquire();
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        let _again = lock.acquire();
    }

    #[test]
    fn second_acquire_waits_for_release() {
        let lock = Arc::new(ResourceLock::new("bus"));
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = lock.acquire();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for w in workers {
            assert!(w.join().is_ok());
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_acquire_gives_up_while_held_elsewhere() {
        let lock = Arc::new(ResourceLock::new("spi"));
        let held = Arc::clone(&lock);
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let holder = thread::spawn(move || {
            let _guard = held.acquire();
            let _ = tx.send(());
            let _ = done_rx.recv();
        });
        let _ = rx.recv();
        assert!(lock.try_acquire_for(Duration::from_millis(20)).is_none());
        let _ = done_tx.send(());
        assert!(holder.join().is_ok());
        assert!(lock.try_acquire_for(Duration::from_millis(20)).is_some());
    }

    #[test]
    #[should_panic(expected = "general fault")]
    fn acquire_timeout_is_fatal() {
        let lock = Arc::new(ResourceLock::with_timeout("timers", Duration::from_millis(20)));
        let held = Arc::clone(&lock);
        let (tx, rx) = std::sync::mpsc::channel();
        // The holder parks forever; the test thread panics on the bound.
        thread::spawn(move || {
            let _guard = held.acquire();
            let _ = tx.send(());
            loop {
                thread::park();
            }
        });
        let _ = rx.recv();
        let _guard = lock.acquire();
    }
}
