//! Multi-way select over labelled channel operations.
//!
//! A [`Selection`] races a set of operations, each tagged with a label. The
//! first one to complete is returned together with the remaining selection,
//! which can be selected on again:
//!
//! ```ignore
//! let mut sel = Selection::new([("jobs", jobs.recv_op()), ("ctl", ctl.recv_op())]);
//! while let Some(((label, value), rest)) = select(sel).await {
//!     handle(label, value);
//!     sel = rest;
//! }
//! ```
//!
//! Operations that finished in the same poll as the winner are not lost:
//! they are kept and handed out by later selects, oldest first.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

/// A set of pending labelled operations.
pub struct Selection<L, R> {
    pending: FuturesUnordered<BoxFuture<'static, (L, R)>>,
    completed: VecDeque<(L, R)>,
}

impl<L, R> Selection<L, R>
where
    L: Send + 'static,
    R: Send + 'static,
{
    /// Build a selection from `(label, operation)` pairs.
    pub fn new<I, F>(ops: I) -> Self
    where
        I: IntoIterator<Item = (L, F)>,
        F: Future<Output = R> + Send + 'static,
    {
        let mut selection = Self::empty();
        for (label, op) in ops {
            selection.push(label, op);
        }
        selection
    }

    pub fn empty() -> Self {
        Self {
            pending: FuturesUnordered::new(),
            completed: VecDeque::new(),
        }
    }

    /// Add one more operation to the race.
    pub fn push<F>(&mut self, label: L, op: F)
    where
        F: Future<Output = R> + Send + 'static,
    {
        self.pending.push(op.map(move |r| (label, r)).boxed());
    }

    /// Wait for the next completed operation.
    ///
    /// Returns `None` once every operation has been handed out.
    pub async fn next(&mut self) -> Option<(L, R)> {
        if let Some(done) = self.completed.pop_front() {
            return Some(done);
        }

        let first = self.pending.next().await?;

        // Keep anything else that is already finished.
        while let Some(Some(done)) = self.pending.next().now_or_never() {
            self.completed.push_back(done);
        }
        Some(first)
    }
}

impl<L, R> Selection<L, R> {
    /// Operations not yet handed out, finished or not.
    pub fn len(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }
}

impl<L, R> fmt::Debug for Selection<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}

/// Wait for the first operation of `selection` to complete.
///
/// Returns the winning `(label, result)` and the selection of the
/// remaining operations, or `None` if the selection is empty.
pub async fn select<L, R>(mut selection: Selection<L, R>) -> Option<((L, R), Selection<L, R>)>
where
    L: Send + 'static,
    R: Send + 'static,
{
    let done = selection.next().await?;
    Some((done, selection))
}
