//! Synchronization primitives.
//!
//! `list` is the intrusive list shared by the ready queue and semaphore
//! waiter queues; `semaphore`/`mutex` are the blocking primitives built on
//! top of it (§4.E); `ioqueue` is the keyboard's blocking ring buffer (§4.J).

pub mod ioqueue;
pub mod list;
pub mod semaphore;

pub use ioqueue::IoQueue;
pub use list::{IntrusiveList, ListLink};
pub use semaphore::{Mutex, Semaphore};
