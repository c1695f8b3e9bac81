// PingZee - Worker Task
//
// One thread per hardware resource. The thread owns a single message buffer,
// blocks on the request mailbox, dispatches the command to its `Handler`,
// then completes the message exactly once according to its `Done` policy.
//
//   caller ── submit ──► requests ──► worker ── Done::Reply ──► results ──► caller
//                                        └──── Done::Notify(fn) ───► callback

use std::thread::{self, JoinHandle};

use crate::config::RESULT_PUT_TIMEOUT;
use crate::sync::{LockGuard, Mailbox, ReadyLatch, ResourceLock};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// What the worker does with a message once its command has run.
#[derive(Debug)]
pub enum Done<M> {
    /// Fire and forget.
    Discard,
    /// Post the completed message to the resource's result mailbox.
    Reply,
    /// Hand the completed message to a function on the worker thread.
    Notify(fn(&M)),
}

// Manual impls: derive would demand `M: Copy`.
impl<M> Clone for Done<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Done<M> {}

impl<M> PartialEq for Done<M> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Discard, Self::Discard) | (Self::Reply, Self::Reply) => true,
            (Self::Notify(a), Self::Notify(b)) => std::ptr::eq(*a as *const (), *b as *const ()),
            _ => false,
        }
    }
}

/// A request/result record carried by value through the mailboxes.
pub trait Message: Copy + Send + 'static {
    fn done(&self) -> Done<Self>;
}

// ---------------------------------------------------------------------------
// Endpoint: the resource as seen by its callers
// ---------------------------------------------------------------------------

pub struct Endpoint<M, const REQ: usize, const RES: usize> {
    name: &'static str,
    requests: Mailbox<M, REQ>,
    results: Mailbox<M, RES>,
    lock: ResourceLock,
    ready: ReadyLatch,
}

impl<M: Message, const REQ: usize, const RES: usize> Endpoint<M, REQ, RES> {
    pub fn new(name: &'static str) -> Self {
        Self::with_lock(name, ResourceLock::new(name))
    }

    pub fn with_lock(name: &'static str, lock: ResourceLock) -> Self {
        Self {
            name,
            requests: Mailbox::new(name),
            results: Mailbox::new(name),
            lock,
            ready: ReadyLatch::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a request. A full request mailbox halts.
    #[track_caller]
    pub fn submit(&self, msg: M) {
        self.requests.put(msg);
    }

    /// Block until the worker posts a completed `Done::Reply` message.
    pub fn take_result(&self) -> M {
        self.results.get()
    }

    /// Submit and wait for the reply. `msg` must carry `Done::Reply`.
    #[track_caller]
    pub fn call(&self, msg: M) -> M {
        debug_assert!(msg.done() == Done::Reply, "{}: call() needs Done::Reply", self.name);
        self.submit(msg);
        self.take_result()
    }

    /// `call` under the resource lock.
    #[track_caller]
    pub fn transaction(&self, msg: M) -> M {
        let _guard = self.lock.acquire();
        self.call(msg)
    }

    #[track_caller]
    pub fn lock(&self) -> LockGuard<'_> {
        self.lock.acquire()
    }

    pub fn resource_lock(&self) -> &ResourceLock {
        &self.lock
    }

    pub fn ready(&self) -> &ReadyLatch {
        &self.ready
    }

    /// Request mailbox, for interrupt handlers that post directly.
    pub fn requests(&self) -> &Mailbox<M, REQ> {
        &self.requests
    }

    /// Default completion: post to the result mailbox, halting if the
    /// previous result was never collected.
    #[track_caller]
    pub fn post_result(&self, msg: M) {
        self.results.put_or_fault(msg, RESULT_PUT_TIMEOUT);
    }

    fn complete(&self, msg: &M) {
        match msg.done() {
            Done::Discard => {}
            Done::Reply => self.post_result(*msg),
            Done::Notify(f) => f(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler: what a worker does with each command
// ---------------------------------------------------------------------------

pub trait Handler: Send + 'static {
    type Msg: Message;

    /// Hardware bring-up, run once on the worker thread after every upstream
    /// dependency is ready. An error is logged; the worker still serves.
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle(&mut self, msg: &mut Self::Msg);
}

/// Spawn the worker thread for `endpoint`. The thread waits for every latch
/// in `after`, runs `init`, raises the endpoint's own latch, then serves
/// requests forever.
pub fn spawn<H, const REQ: usize, const RES: usize>(
    endpoint: &'static Endpoint<H::Msg, REQ, RES>,
    mut handler: H,
    after: &[&'static ReadyLatch],
    stack_size: usize,
) -> anyhow::Result<JoinHandle<()>>
where
    H: Handler,
{
    let after: Vec<&'static ReadyLatch> = after.to_vec();
    let handle = thread::Builder::new()
        .name(endpoint.name().into())
        .stack_size(stack_size)
        .spawn(move || {
            for latch in after {
                latch.wait();
            }
            if let Err(e) = handler.init() {
                log::error!("{}: init failed: {:#}", endpoint.name(), e);
            }
            endpoint.ready().signal();
            log::info!("{} task started", endpoint.name());

            loop {
                let mut current = endpoint.requests.get();
                handler.handle(&mut current);
                endpoint.complete(&current);
            }
        })?;
    Ok(handle)
}
