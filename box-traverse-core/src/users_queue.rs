//! Bounds how many users are driven at once.
//!
//! Each task here authenticates one user, registers them, seeds their traversal and then
//! holds its slot until that user's queue drains.

use std::sync::Arc;

use tracing::{error, info};

use crate::completion::CompletionTracker;
use crate::contract::{Authenticator, Recorder};
use crate::correlation::CorrelationId;
use crate::engine::TraversalEngine;
use crate::enumerate::UserTarget;
use crate::queue::{RateLimitedQueue, TaskHandle};
use crate::registry::UserRegistry;
use crate::stats::{Event, TraversalStats};

#[derive(Clone)]
pub struct UsersTaskQueue {
    queue: RateLimitedQueue,
    auth: Arc<dyn Authenticator>,
    registry: Arc<UserRegistry>,
    engine: Arc<TraversalEngine>,
    tracker: Arc<CompletionTracker>,
    recorder: Arc<dyn Recorder>,
    stats: Arc<TraversalStats>,
}

impl UsersTaskQueue {
    /// `queue` should be the same queue the [`CompletionTracker`] watches.
    pub fn new(
        queue: RateLimitedQueue,
        auth: Arc<dyn Authenticator>,
        registry: Arc<UserRegistry>,
        engine: Arc<TraversalEngine>,
        tracker: Arc<CompletionTracker>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        let stats = Arc::clone(engine.stats());
        Self {
            queue,
            auth,
            registry,
            engine,
            tracker,
            recorder,
            stats,
        }
    }

    pub fn queue(&self) -> &RateLimitedQueue {
        &self.queue
    }

    pub fn add_user_task(&self, target: UserTarget) -> TaskHandle<()> {
        let this = self.clone();
        let user_id = target.user_id.clone();
        let handle = self.queue.add(async move { this.process_user(target).await });
        info!(
            correlation_id = "N/A",
            action = "CREATED_TRAVERSAL_TASK",
            owner_id = %user_id,
            users_queue_size = self.queue.size(),
            "Created a traversal task for user {user_id}"
        );
        handle
    }

    async fn process_user(&self, target: UserTarget) {
        let cid = CorrelationId::new();

        let client = match self.auth.user_client(&target.user_id).await {
            Ok(client) => client,
            Err(e) => {
                self.stats.bump(Event::UserSkipped);
                self.recorder.record_error(
                    &e,
                    "getUserItems",
                    &format!("Authentication as user \"{}\"", target.user_id),
                    &cid,
                );
                return;
            }
        };

        let profile = match client.current_user().await {
            Ok(profile) => profile,
            Err(e) => {
                self.stats.bump(Event::UserSkipped);
                self.recorder.record_error(
                    &e,
                    "getUserItems",
                    &format!("Retrieval of user info for user \"{}\"", target.user_id),
                    &cid,
                );
                return;
            }
        };
        info!(
            correlation_id = %cid,
            action = "RETRIEVE_USER_INFO",
            owner_id = %profile.id,
            "Successfully retrieved user info for \"{}\"",
            profile.name
        );

        let registration = match self.registry.add_user(profile, client) {
            Ok(registration) => registration,
            Err(e) => {
                self.stats.bump(Event::UserSkipped);
                error!(
                    correlation_id = %cid,
                    action = "UNKNOWN_ERROR",
                    owner_id = %target.user_id,
                    "Registration of user failed: {e}"
                );
                return;
            }
        };
        let ctx = registration.context;

        if registration.created {
            self.stats.bump(Event::UserRegistered);
            info!(
                correlation_id = %ctx.id(),
                action = "INITIALIZE_TASK_QUEUE",
                owner_id = ctx.id(),
                "Successfully initialized a task queue for \"{}\"",
                ctx.profile().name
            );
        }

        self.engine.seed(&ctx, target.seeds, &cid);

        // A re-registered user already has a watcher; it re-arms on the new work.
        if registration.created {
            let _ = self.tracker.watch_user(Arc::clone(&ctx));
        }

        ctx.queue().on_idle().await;
    }
}
