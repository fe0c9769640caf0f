//! Per-user and global drain detection.
//!
//! A user is done when their queue is idle. The run is done when enumeration is sealed, the
//! users queue is idle, no user is flagged as processing and every registered queue is
//! actually empty. Whoever observes the last of those conditions fires completion; an
//! atomic flag makes sure that happens once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::queue::RateLimitedQueue;
use crate::registry::{UserContext, UserRegistry};

type Hook = Box<dyn FnOnce() + Send>;

pub struct CompletionTracker {
    registry: Arc<UserRegistry>,
    users_queue: RateLimitedQueue,
    sealed: AtomicBool,
    fired: AtomicBool,
    done: watch::Sender<bool>,
    hook: Mutex<Option<Hook>>,
}

impl CompletionTracker {
    pub fn new(registry: Arc<UserRegistry>, users_queue: RateLimitedQueue) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            registry,
            users_queue,
            sealed: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            done,
            hook: Mutex::new(None),
        })
    }

    /// Registers a callback run once, at completion. Replaces any earlier hook.
    pub fn on_complete(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Follows one user's queue for the rest of the run.
    ///
    /// Every time the queue drains the user is marked idle and global completion is
    /// checked; as soon as work shows up again the user is marked busy.
    pub fn watch_user(self: &Arc<Self>, ctx: Arc<UserContext>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut done = self.done.subscribe();
        tokio::spawn(async move {
            loop {
                ctx.queue().on_idle().await;
                ctx.set_processing(false);
                info!(
                    correlation_id = %ctx.id(),
                    action = "FINISHED_TASK_QUEUE",
                    owner_id = ctx.id(),
                    "All tasks processed for \"{}\"",
                    ctx.profile().name
                );
                tracker.check();

                tokio::select! {
                    _ = ctx.queue().on_busy() => {
                        ctx.set_processing(true);
                        debug!(owner_id = ctx.id(), "User queue busy again");
                    }
                    _ = wait_done(&mut done) => break,
                }
            }
        })
    }

    /// No more users will be added. Completion can fire from here on.
    pub fn seal(self: &Arc<Self>) {
        self.sealed.store(true, Ordering::SeqCst);
        let tracker = Arc::clone(self);
        let users_idle = self.users_queue.on_idle();
        tokio::spawn(async move {
            users_idle.await;
            tracker.check();
        });
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fires completion if every condition holds. Returns whether this call fired it.
    pub fn check(&self) -> bool {
        if !self.is_sealed() || self.is_complete() {
            return false;
        }
        if !self.users_queue.is_idle() {
            debug!(users_queue = ?self.users_queue.load(), "Users queue still busy");
            return false;
        }
        let active = self.registry.active_processing_users();
        if !active.is_empty() {
            debug!(active = ?active, "Users still processing");
            return false;
        }
        if !self.registry.all_drained() {
            return false;
        }
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        info!(
            correlation_id = "N/A",
            action = "TRAVERSAL_COMPLETE",
            users = self.registry.len(),
            "All user queues drained"
        );
        let hook = self.hook.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(hook) = hook {
            hook();
        }
        self.done.send_replace(true);
        true
    }

    /// Resolves once completion has fired.
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        wait_done(&mut rx).await;
    }
}

async fn wait_done(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|finished| *finished).await;
}
