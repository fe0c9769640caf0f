//! Rate-limited asynchronous task queue.
//!
//! Each queue owns a driver task that admits jobs in FIFO order. A job is admitted only when
//! fewer than `interval_cap` jobs have *started* within the trailing `interval`, and, when a
//! concurrency bound is set, only when a permit is free. Finished jobs never count against
//! later windows.
//!
//! Queue load (queued + running) is published through a `watch` channel. `on_idle` and
//! `on_busy` are just predicates over that channel, so every call observes the current
//! state and re-arms naturally after each drain.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::TaskError;

/// Admission limits for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum starts per `interval`. `None` means no rate limit.
    pub interval_cap: Option<usize>,
    pub interval: Duration,
    /// Maximum jobs running at once. `None` means unbounded.
    pub concurrency: Option<usize>,
}

impl QueueOptions {
    /// `cap` starts per rolling second, unbounded concurrency.
    pub fn per_second(cap: usize) -> Self {
        Self {
            interval_cap: Some(cap.max(1)),
            interval: Duration::from_secs(1),
            concurrency: None,
        }
    }

    /// No rate limit, at most `limit` jobs running at once.
    pub fn concurrency(limit: usize) -> Self {
        Self {
            interval_cap: None,
            interval: Duration::from_secs(1),
            concurrency: Some(limit.max(1)),
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::per_second(16)
    }
}

/// Snapshot of a queue's load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLoad {
    pub queued: usize,
    pub running: usize,
}

impl QueueLoad {
    pub fn size(&self) -> usize {
        self.queued + self.running
    }

    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0
    }
}

type Job = BoxFuture<'static, ()>;

/// Handle to a queued task. Resolves with the task's output once it has run.
#[must_use = "dropping a TaskHandle does not cancel the task"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(TaskError::Dropped)))
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<Job>,
    load: Arc<watch::Sender<QueueLoad>>,
    options: QueueOptions,
}

/// Cheaply cloneable handle to a rate-limited queue.
///
/// Must be created inside a Tokio runtime; the driver task is spawned on construction and
/// exits once every handle has been dropped and the backlog is empty.
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<Inner>,
}

impl RateLimitedQueue {
    pub fn new(options: QueueOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (load, _) = watch::channel(QueueLoad::default());
        let load = Arc::new(load);
        tokio::spawn(drive(rx, Arc::clone(&load), options.clone()));
        Self {
            inner: Arc::new(Inner { tx, load, options }),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    /// Appends a task. Never blocks and never fails here; a task's own failure is
    /// reported through the returned handle.
    pub fn add<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, rx) = oneshot::channel();
        let job: Job = async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let outcome = match outcome {
                Ok(value) => Ok(value),
                Err(_) => {
                    error!(action = "TASK_PANICKED", "Queued task panicked");
                    Err(TaskError::Panicked)
                }
            };
            // The caller may have dropped the handle; that is fine.
            let _ = result_tx.send(outcome);
        }
        .boxed();

        self.inner.load.send_modify(|l| l.queued += 1);
        if self.inner.tx.send(job).is_err() {
            // Driver is gone; the job (and its result sender) is dropped with the error.
            self.inner.load.send_modify(|l| l.queued -= 1);
        }
        TaskHandle { rx }
    }

    pub fn load(&self) -> QueueLoad {
        *self.inner.load.borrow()
    }

    /// Queued plus running tasks.
    pub fn size(&self) -> usize {
        self.load().size()
    }

    pub fn queued(&self) -> usize {
        self.load().queued
    }

    pub fn running(&self) -> usize {
        self.load().running
    }

    pub fn is_idle(&self) -> bool {
        self.load().is_idle()
    }

    /// Resolves once nothing is queued and nothing is running. Resolves immediately if that
    /// is already the case.
    pub fn on_idle(&self) -> impl Future<Output = ()> + Send + 'static {
        self.wait_for(QueueLoad::is_idle)
    }

    /// Resolves once at least one task is queued or running.
    pub fn on_busy(&self) -> impl Future<Output = ()> + Send + 'static {
        self.wait_for(|l| !l.is_idle())
    }

    fn wait_for(
        &self,
        predicate: fn(&QueueLoad) -> bool,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.load.subscribe();
        async move {
            // The sender lives as long as any queue handle or the driver.
            let _ = rx.wait_for(|l| predicate(l)).await;
        }
    }
}

impl std::fmt::Debug for RateLimitedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedQueue")
            .field("options", &self.inner.options)
            .field("load", &self.load())
            .finish()
    }
}

/// Sliding record of recent start instants.
struct StartWindow {
    cap: Option<usize>,
    interval: Duration,
    starts: VecDeque<Instant>,
}

impl StartWindow {
    fn new(cap: Option<usize>, interval: Duration) -> Self {
        Self {
            cap,
            interval,
            starts: VecDeque::new(),
        }
    }

    /// Waits until one more start fits in the trailing interval, then records it.
    async fn admit(&mut self) {
        let Some(cap) = self.cap else { return };
        loop {
            let now = Instant::now();
            while let Some(&oldest) = self.starts.front() {
                if now.duration_since(oldest) >= self.interval {
                    self.starts.pop_front();
                } else {
                    break;
                }
            }
            if self.starts.len() < cap {
                self.starts.push_back(now);
                return;
            }
            if let Some(&oldest) = self.starts.front() {
                tokio::time::sleep_until(oldest + self.interval).await;
            }
        }
    }
}

async fn drive(
    mut rx: mpsc::UnboundedReceiver<Job>,
    load: Arc<watch::Sender<QueueLoad>>,
    options: QueueOptions,
) {
    let mut window = StartWindow::new(options.interval_cap, options.interval);
    let permits = options.concurrency.map(|n| Arc::new(Semaphore::new(n)));

    while let Some(job) = rx.recv().await {
        let permit = match &permits {
            Some(sem) => match Arc::clone(sem).acquire_owned().await {
                Ok(p) => Some(p),
                Err(_) => break,
            },
            None => None,
        };
        window.admit().await;

        load.send_modify(|l| {
            l.queued -= 1;
            l.running += 1;
        });

        let load = Arc::clone(&load);
        tokio::spawn(async move {
            job.await;
            drop(permit);
            load.send_modify(|l| l.running -= 1);
        });
    }
    debug!("Queue driver stopped");
}
