// PingZee - Mailbox Channel
//
// Fixed-capacity FIFO of `Copy` messages. Messages are copied in on put and
// copied out on get; nothing is allocated after construction.
//
// On the device the backing store is a FreeRTOS queue, which can be posted
// from interrupt context. On the host it is a `heapless::Deque` behind a
// mutex and two condition variables.

use std::time::Duration;

use crate::config::REQUEST_PUT_TIMEOUT;
use crate::fault::general_fault;

/// Read and clear the yield request left by [`Mailbox::post_from_isr`]. The
/// timer ISR hands it back to the driver, which switches to the woken task.
pub fn take_isr_yield() -> bool {
    backend::take_yield()
}

pub struct Mailbox<T, const N: usize> {
    name: &'static str,
    queue: backend::Queue<T, N>,
}

impl<T: Copy + Send, const N: usize> Mailbox<T, N> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: backend::Queue::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Enqueue with the short request timeout. Every mailbox has a worker
    /// that drains it quickly, so a full queue here is a fault.
    #[track_caller]
    pub fn put(&self, msg: T) {
        self.put_or_fault(msg, REQUEST_PUT_TIMEOUT);
    }

    #[track_caller]
    pub fn put_or_fault(&self, msg: T, timeout: Duration) {
        if self.put_timeout(msg, timeout).is_err() {
            general_fault(self.name);
        }
    }

    /// Enqueue, waiting at most `timeout` for a free slot. Gives the message
    /// back when the queue stayed full.
    pub fn put_timeout(&self, msg: T, timeout: Duration) -> Result<(), T> {
        self.queue.send(msg, Some(timeout)).map(|_| ())
    }

    /// Zero-wait enqueue for interrupt context. Returns `false` when the
    /// message was dropped because the queue is full. A post that unblocks a
    /// waiting task leaves a yield request for [`take_isr_yield`].
    pub fn post_from_isr(&self, msg: T) -> bool {
        match self.queue.send(msg, Some(Duration::ZERO)) {
            Ok(woken) => {
                if woken {
                    backend::request_yield();
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Block until a message arrives.
    pub fn get(&self) -> T {
        loop {
            if let Some(msg) = self.queue.recv(None) {
                return msg;
            }
        }
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        self.queue.recv(Some(timeout))
    }

    pub fn try_get(&self) -> Option<T> {
        self.queue.recv(Some(Duration::ZERO))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(not(target_os = "espidf"))]
mod backend {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
    use std::time::{Duration, Instant};

    use heapless::Deque;

    thread_local! {
        // The simulated ISRs run on the thread that drives them.
        static ISR_YIELD: Cell<bool> = const { Cell::new(false) };
    }

    pub fn request_yield() {
        ISR_YIELD.with(|y| y.set(true));
    }

    pub fn take_yield() -> bool {
        ISR_YIELD.with(|y| y.replace(false))
    }

    pub struct Queue<T, const N: usize> {
        slots: Mutex<Deque<T, N>>,
        readable: Condvar,
        writable: Condvar,
        receivers: AtomicUsize,
    }

    impl<T, const N: usize> Queue<T, N> {
        pub fn new() -> Self {
            Self {
                slots: Mutex::new(Deque::new()),
                readable: Condvar::new(),
                writable: Condvar::new(),
                receivers: AtomicUsize::new(0),
            }
        }

        fn slots(&self) -> MutexGuard<'_, Deque<T, N>> {
            self.slots.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// `Ok(true)` when a receiver was blocked waiting for this message.
        pub fn send(&self, msg: T, timeout: Option<Duration>) -> Result<bool, T> {
            let deadline = timeout.map(|t| Instant::now() + t);
            let mut slots = self.slots();
            while slots.is_full() {
                slots = match wait(&self.writable, slots, deadline) {
                    Some(slots) => slots,
                    None => return Err(msg),
                };
            }
            slots.push_back(msg)?;
            let woken = self.receivers.load(Ordering::SeqCst) > 0;
            drop(slots);
            self.readable.notify_one();
            Ok(woken)
        }

        pub fn recv(&self, timeout: Option<Duration>) -> Option<T> {
            let deadline = timeout.map(|t| Instant::now() + t);
            let mut slots = self.slots();
            loop {
                if let Some(msg) = slots.pop_front() {
                    drop(slots);
                    self.writable.notify_one();
                    return Some(msg);
                }
                self.receivers.fetch_add(1, Ordering::SeqCst);
                let woke = wait(&self.readable, slots, deadline);
                self.receivers.fetch_sub(1, Ordering::SeqCst);
                slots = woke?;
            }
        }

        #[cfg(test)]
        pub fn blocked_receivers(&self) -> usize {
            self.receivers.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.slots().len()
        }
    }

    /// Wait on `cv` until notified or `deadline` passes. `None` means the
    /// deadline passed with the condition still unmet.
    fn wait<'a, T>(
        cv: &Condvar,
        guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
    ) -> Option<MutexGuard<'a, T>> {
        match deadline {
            None => Some(cv.wait(guard).unwrap_or_else(PoisonError::into_inner)),
            Some(deadline) => {
                let left = deadline.checked_duration_since(Instant::now())?;
                if left.is_zero() {
                    return None;
                }
                let (guard, _) = cv
                    .wait_timeout(guard, left)
                    .unwrap_or_else(PoisonError::into_inner);
                Some(guard)
            }
        }
    }
}

#[cfg(target_os = "espidf")]
mod backend {
    use std::marker::PhantomData;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use esp_idf_hal::delay::{TickType, BLOCK};
    use esp_idf_hal::task::queue::Queue as RtosQueue;

    static ISR_YIELD: AtomicBool = AtomicBool::new(false);

    pub fn request_yield() {
        ISR_YIELD.store(true, Ordering::Release);
    }

    pub fn take_yield() -> bool {
        ISR_YIELD.swap(false, Ordering::AcqRel)
    }

    pub struct Queue<T, const N: usize> {
        inner: RtosQueue<T>,
        _slots: PhantomData<[T; N]>,
    }

    impl<T: Copy, const N: usize> Queue<T, N> {
        pub fn new() -> Self {
            Self {
                inner: RtosQueue::new(N),
                _slots: PhantomData,
            }
        }

        fn ticks(timeout: Option<Duration>) -> u32 {
            timeout.map_or(BLOCK, |t| TickType::from(t).ticks())
        }

        // FreeRTOS picks the FromISR variant when called in interrupt context;
        // only that variant reports a woken task.
        pub fn send(&self, msg: T, timeout: Option<Duration>) -> Result<bool, T> {
            self.inner.send_back(msg, Self::ticks(timeout)).map_err(|_| msg)
        }

        pub fn recv(&self, timeout: Option<Duration>) -> Option<T> {
            self.inner.recv_front(Self::ticks(timeout)).map(|(msg, _)| msg)
        }

        pub fn len(&self) -> usize {
            unsafe { esp_idf_sys::uxQueueMessagesWaiting(self.inner.as_raw()) as usize }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_kept() {
        let mb: Mailbox<u32, 4> = Mailbox::new("fifo");
        for v in 1..=4 {
            mb.put(v);
        }
        assert_eq!(mb.len(), 4);
        let got: Vec<u32> = (0..4).map(|_| mb.get()).collect();
        assert_eq!(got, vec![1, 2, 3, 4]);
        assert!(mb.is_empty());
    }

    #[test]
    fn full_queue_refuses_isr_post() {
        let mb: Mailbox<u8, 1> = Mailbox::new("single");
        assert!(mb.post_from_isr(1));
        assert!(!mb.post_from_isr(2));
        assert_eq!(mb.try_get(), Some(1));
        assert_eq!(mb.try_get(), None);
    }

    #[test]
    fn isr_post_requests_a_yield_only_when_it_wakes_a_receiver() {
        let mb: &'static Mailbox<u8, 2> = Box::leak(Box::new(Mailbox::new("wake")));
        assert!(mb.post_from_isr(1));
        assert!(!take_isr_yield());
        assert_eq!(mb.try_get(), Some(1));

        let waiter = thread::spawn(move || mb.get());
        while mb.queue.blocked_receivers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(mb.post_from_isr(2));
        assert!(take_isr_yield());
        assert!(!take_isr_yield());
        assert_eq!(waiter.join().ok(), Some(2));
    }

    #[test]
    fn get_timeout_expires_on_empty_queue() {
        let mb: Mailbox<u8, 2> = Mailbox::new("empty");
        assert_eq!(mb.get_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn put_timeout_hands_message_back() {
        let mb: Mailbox<u8, 1> = Mailbox::new("full");
        mb.put(1);
        assert_eq!(mb.put_timeout(9, Duration::from_millis(10)), Err(9));
    }

    #[test]
    #[should_panic(expected = "general fault")]
    fn put_on_full_queue_is_fatal() {
        let mb: Mailbox<u8, 1> = Mailbox::new("wedged");
        mb.put(1);
        mb.put(2);
    }

    #[test]
    fn blocked_get_wakes_on_put() {
        let mb: Arc<Mailbox<u16, 2>> = Arc::new(Mailbox::new("wake"));
        let rx = Arc::clone(&mb);
        let reader = thread::spawn(move || rx.get());
        thread::sleep(Duration::from_millis(20));
        mb.put(0xBEEF);
        assert_eq!(reader.join().ok(), Some(0xBEEF));
    }

    #[test]
    fn blocked_put_proceeds_once_drained() {
        let mb: Arc<Mailbox<u8, 1>> = Arc::new(Mailbox::new("drain"));
        mb.put(1);
        let tx = Arc::clone(&mb);
        let writer = thread::spawn(move || tx.put_timeout(2, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(mb.get(), 1);
        assert_eq!(writer.join().ok(), Some(Ok(())));
        assert_eq!(mb.get(), 2);
    }
}
