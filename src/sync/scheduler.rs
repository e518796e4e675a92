//! Background task scheduler (`go`).
//!
//! Work is submitted into a bounded queue drained by one worker thread that
//! runs a single-threaded tokio runtime. The worker is started on demand
//! when work arrives and none is running, and retires as soon as the last
//! outstanding task finishes, unless [`Scheduler::keep_running`] holds it.
//!
//! The outstanding count is raised before a task is queued and lowered when
//! it finishes, whether it returned or panicked, so a worker is never
//! retired while work is still in its queue.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Default capacity of the work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type Job = BoxFuture<'static, ()>;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Work queue capacity (default: 1024).
    pub queue_capacity: usize,
    /// Name of the worker thread (default: `eventloop-worker`).
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: "eventloop-worker".to_string(),
        }
    }
}

struct Worker {
    tx: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

struct Inner {
    config: SchedulerConfig,
    outstanding: AtomicUsize,
    keep_running: AtomicBool,
    worker: Mutex<Option<Worker>>,
    /// Threads of stopped workers, joined by `shutdown`.
    retired: Mutex<Vec<JoinHandle<()>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Inner {
    fn start_worker(&self) -> Result<Worker> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::channel::<Job>(self.config.queue_capacity.max(1));

        let thread = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        tokio::spawn(job);
                    }
                });
            })?;

        let starts = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("scheduler loop {} started on {}", starts, self.config.thread_name);
        Ok(Worker { tx, thread })
    }

    /// Retire the worker if nothing is outstanding and it is not held.
    ///
    /// Caller holds the worker lock.
    fn retire_if_idle(&self, worker: &mut Option<Worker>) {
        if self.outstanding.load(Ordering::SeqCst) != 0 || self.keep_running.load(Ordering::SeqCst) {
            return;
        }
        // Dropping the sender ends the worker's receive loop.
        if let Some(Worker { tx, thread }) = worker.take() {
            drop(tx);
            self.retired.lock().push(thread);
            let stops = self.stops.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!("scheduler loop stopped ({} stops)", stops);
        }
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut worker = self.worker.lock();
            self.retire_if_idle(&mut worker);
        }
    }
}

#[derive(Clone, Copy)]
enum Submit {
    /// Block the calling thread while the queue is full (outside a runtime).
    Wait,
    /// Fail with `SchedulerFull` if the queue is full.
    Try,
}

/// Runs futures on a background worker thread.
///
/// Cheap to clone; clones share the same worker and counters.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                outstanding: AtomicUsize::new(0),
                keep_running: AtomicBool::new(false),
                worker: Mutex::new(None),
                retired: Mutex::new(Vec::new()),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }),
        }
    }

    /// Submit a future and return a handle to its result.
    ///
    /// Called outside an async context, this blocks while the work queue is
    /// full. Inside a tokio runtime it cannot block, so a full queue is
    /// reported as [`Error::SchedulerFull`].
    pub fn schedule<F, T>(&self, fut: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(fut, Submit::Wait)
    }

    /// Submit a future without ever blocking.
    ///
    /// # Errors
    ///
    /// [`Error::SchedulerFull`] if the work queue is full.
    pub fn try_schedule<F, T>(&self, fut: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(fut, Submit::Try)
    }

    fn submit<F, T>(&self, fut: F, mode: Submit) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let job: Job = Box::pin(async move {
            let outcome = AssertUnwindSafe(fut).catch_unwind().await;
            inner.finish_one();
            let _ = result_tx.send(outcome);
        });

        let tx = {
            let mut worker = self.inner.worker.lock();
            self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
            if worker.is_none() {
                match self.inner.start_worker() {
                    Ok(started) => *worker = Some(started),
                    Err(e) => {
                        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
                        return Err(e);
                    }
                }
            }
            match worker.as_ref() {
                Some(w) => w.tx.clone(),
                None => return Err(Error::ChannelClosed),
            }
        };

        let in_runtime = tokio::runtime::Handle::try_current().is_ok();
        let sent = match mode {
            Submit::Wait if !in_runtime => tx.blocking_send(job).map_err(|_| Error::ChannelClosed),
            _ => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::SchedulerFull,
                mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
            }),
        };

        if let Err(e) = sent {
            // The job never reached the worker; undo its count.
            self.inner.finish_one();
            tracing::warn!("failed to schedule task: {}", e);
            return Err(e);
        }

        Ok(TaskHandle { rx: result_rx })
    }

    /// Hold the worker alive while idle, or release it.
    ///
    /// Holding starts a worker if none is running. Releasing an idle worker
    /// stops it.
    pub fn keep_running(&self, keep: bool) -> Result<()> {
        let mut worker = self.inner.worker.lock();
        self.inner.keep_running.store(keep, Ordering::SeqCst);
        if keep {
            if worker.is_none() {
                *worker = Some(self.inner.start_worker()?);
            }
        } else {
            self.inner.retire_if_idle(&mut worker);
        }
        Ok(())
    }

    /// Release the worker and join every stopped worker thread.
    ///
    /// Tasks still outstanding keep their worker alive until they finish;
    /// that worker retires on its own afterwards. Must not be called from a
    /// scheduled task.
    pub fn shutdown(&self) {
        {
            let mut worker = self.inner.worker.lock();
            self.inner.keep_running.store(false, Ordering::SeqCst);
            self.inner.retire_if_idle(&mut worker);
        }
        let retired = std::mem::take(&mut *self.inner.retired.lock());
        for thread in retired {
            if thread.join().is_err() {
                tracing::warn!("scheduler worker thread panicked");
            }
        }
    }

    /// Tasks submitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Number of times a worker has been started.
    pub fn loop_starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Number of times a worker has been stopped.
    pub fn loop_stops(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("outstanding", &self.outstanding())
            .field("running", &self.is_running())
            .field("starts", &self.loop_starts())
            .field("stops", &self.loop_stops())
            .finish()
    }
}

/// Handle to the result of a scheduled task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<std::thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block the current thread until the task finishes.
    ///
    /// Panics if called from within an async context; use [`wait`](Self::wait)
    /// there.
    pub fn result(self) -> Result<T> {
        flatten(self.rx.blocking_recv())
    }

    /// Wait for the task to finish.
    pub async fn wait(self) -> Result<T> {
        flatten(self.rx.await)
    }
}

fn flatten<T>(received: std::result::Result<std::thread::Result<T>, oneshot::error::RecvError>) -> Result<T> {
    match received {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(panic)) => Err(Error::TaskFailed(panic_message(panic.as_ref()))),
        Err(_) => Err(Error::TaskFailed("task dropped before completion".to_string())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
