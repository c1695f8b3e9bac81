pub mod lock;
pub mod mailbox;
pub mod ready;

pub use lock::{LockGuard, ResourceLock};
pub use mailbox::Mailbox;
pub use ready::ReadyLatch;
