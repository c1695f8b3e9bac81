// PingZee - Readiness Latch
//
// One-shot signal a worker raises once its hardware is usable. Dependent
// workers block on it before their own bring-up.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

pub struct ReadyLatch {
    ready: Mutex<bool>,
    raised: Condvar,
}

impl ReadyLatch {
    pub const fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            raised: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.raised.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        let _ready = self
            .raised
            .wait_while(ready, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// `true` when the latch was raised before `timeout` ran out.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        let (ready, _) = self
            .raised
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
        *ready
    }
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn waiters_release_on_signal() {
        let latch = Arc::new(ReadyLatch::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait())
            })
            .collect();
        assert!(!latch.is_ready());
        latch.signal();
        for w in waiters {
            assert!(w.join().is_ok());
        }
        assert!(latch.is_ready());
    }

    #[test]
    fn wait_timeout_reports_unraised_latch() {
        let latch = ReadyLatch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        latch.signal();
        assert!(latch.wait_timeout(Duration::from_millis(10)));
    }
}
