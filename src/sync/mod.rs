//! Channel-based synchronization primitives.
//!
//! - [`Chan`] - rendezvous, bounded or unbounded channel with close-and-drain
//! - [`Selection`] / [`select`] - wait for the first of several labelled operations
//! - [`Scheduler`] - run futures on a background event loop from synchronous code
//!
//! # Example
//!
//! ```ignore
//! use aerobio_client::sync::{select, Capacity, Chan, Selection};
//!
//! let jobs: Chan<u32> = Chan::new(Capacity::Bounded(4));
//! let status: Chan<u32> = Chan::new(Capacity::Bounded(4));
//! jobs.send(7).await.unwrap();
//!
//! let selection = Selection::new([("jobs", jobs.recv_op()), ("status", status.recv_op())]);
//! let ((label, value), _rest) = select(selection).await.unwrap();
//! assert_eq!((label, value), ("jobs", Some(7)));
//! ```

mod chan;
mod scheduler;
mod select;

pub use chan::{Capacity, Chan, SendError, TryRecvError, TrySendError};
pub use scheduler::{Scheduler, SchedulerConfig, TaskHandle, DEFAULT_QUEUE_CAPACITY};
pub use select::{select, Selection};
