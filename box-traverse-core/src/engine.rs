//! # engine: recursive per-user folder walk
//!
//! Every unit of work is a [`Task`] executed on the queue of the user it belongs to. A folder
//! task lists its children, applies the [`Policy`] to each, hands accepted items to the
//! [`ActionDispatcher`] and enqueues one new folder task per followed subfolder. Nothing is
//! awaited across tasks: the only thing that says "this user is done" is the user's queue
//! going idle.
//!
//! ## Retries
//! A failed attempt re-enqueues the *same* task with its attempt counter incremented. The
//! backoff sleep happens at the start of the re-enqueued task, so the queue counts it as
//! running and cannot drain while a retry is pending. After `retry.maxAttempts` retries the
//! task is abandoned.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::RetrySettings;
use crate::contract::{AuditAction, Recorder};
use crate::correlation::CorrelationId;
use crate::dispatcher::ActionDispatcher;
use crate::enumerate::Seed;
use crate::error::ApiError;
use crate::fetcher::ItemFetcher;
use crate::model::{ItemKind, ROOT_FOLDER_ID};
use crate::policy::{Decision, Policy};
use crate::queue::TaskHandle;
use crate::registry::UserContext;
use crate::stats::{Event, TraversalStats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// List a folder and process its children. `first_iteration` marks the starting folder
    /// of a seed; `follow` controls recursion into child folders.
    TraverseFolder {
        folder_id: String,
        first_iteration: bool,
        follow: bool,
    },
    /// Fetch one item's metadata, then act on it. No recursion.
    FetchItemAndAct { item_id: String, kind: ItemKind },
}

impl From<Seed> for Task {
    fn from(seed: Seed) -> Self {
        match seed {
            Seed::Folder { id, follow } => Task::TraverseFolder {
                folder_id: id,
                first_iteration: true,
                follow,
            },
            Seed::Item { id, kind } => Task::FetchItemAndAct { item_id: id, kind },
        }
    }
}

impl Task {
    fn label(&self) -> &'static str {
        match self {
            Task::TraverseFolder { .. } => "processFolderItems",
            Task::FetchItemAndAct { kind, .. } => match kind {
                ItemKind::Folder => "getFolderInfo",
                ItemKind::File => "getFileInfo",
                ItemKind::WebLink => "getWeblinkInfo",
            },
        }
    }
}

pub struct TraversalEngine {
    fetcher: ItemFetcher,
    policy: Policy,
    retry: RetrySettings,
    recorder: Arc<dyn Recorder>,
    dispatcher: ActionDispatcher,
    stats: Arc<TraversalStats>,
}

impl TraversalEngine {
    pub fn new(
        fetcher: ItemFetcher,
        policy: Policy,
        retry: RetrySettings,
        recorder: Arc<dyn Recorder>,
        dispatcher: ActionDispatcher,
        stats: Arc<TraversalStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            policy,
            retry,
            recorder,
            dispatcher,
            stats,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn stats(&self) -> &Arc<TraversalStats> {
        &self.stats
    }

    /// Enqueues `task` on `owner`'s queue as a first attempt.
    pub fn enqueue(
        self: &Arc<Self>,
        owner: &Arc<UserContext>,
        task: Task,
        parent: &CorrelationId,
    ) -> TaskHandle<()> {
        self.enqueue_attempt(owner, task, parent.clone(), 0, None)
    }

    /// Enqueues every seed. Returns as soon as they are queued.
    pub fn seed(self: &Arc<Self>, owner: &Arc<UserContext>, seeds: Vec<Seed>, parent: &CorrelationId) {
        for seed in seeds {
            let task = Task::from(seed);
            debug!(
                correlation_id = %parent,
                action = "ADD_TO_QUEUE",
                owner_id = owner.id(),
                task = ?task,
                "Seeding traversal task"
            );
            let _ = self.enqueue(owner, task, parent);
        }
    }

    fn enqueue_attempt(
        self: &Arc<Self>,
        owner: &Arc<UserContext>,
        task: Task,
        parent: CorrelationId,
        attempt: u32,
        delay: Option<Duration>,
    ) -> TaskHandle<()> {
        let job = Arc::clone(self).run(Arc::clone(owner), task, parent, attempt, delay);
        owner.queue().add(job)
    }

    // Boxed so that tasks enqueuing further tasks do not produce a recursive future type.
    fn run(
        self: Arc<Self>,
        owner: Arc<UserContext>,
        task: Task,
        parent: CorrelationId,
        attempt: u32,
        delay: Option<Duration>,
    ) -> BoxFuture<'static, ()> {
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match &task {
                Task::TraverseFolder {
                    folder_id,
                    first_iteration,
                    follow,
                } => {
                    self.traverse_folder(&owner, &task, folder_id, *first_iteration, *follow, &parent, attempt)
                        .await
                }
                Task::FetchItemAndAct { item_id, kind } => {
                    self.fetch_item_and_act(&owner, &task, item_id, *kind, &parent, attempt)
                        .await
                }
            }
        }
        .boxed()
    }

    #[allow(clippy::too_many_arguments)]
    async fn traverse_folder(
        self: &Arc<Self>,
        owner: &Arc<UserContext>,
        task: &Task,
        folder_id: &str,
        first_iteration: bool,
        follow: bool,
        parent: &CorrelationId,
        attempt: u32,
    ) {
        let cid = CorrelationId::new();
        let is_root = folder_id == ROOT_FOLDER_ID;
        if is_root {
            info!(
                correlation_id = %cid,
                parent_correlation_id = %parent,
                action = "PREPARE_ROOT_ITEMS",
                owner_id = owner.id(),
                attempt,
                "Beginning to traverse root items for \"{}\"",
                owner.profile().name
            );
        } else {
            info!(
                correlation_id = %cid,
                parent_correlation_id = %parent,
                action = "PREPARE_CHILD_ITEMS",
                owner_id = owner.id(),
                folder_id,
                attempt,
                "Beginning to get child items for folder {folder_id}"
            );
        }

        let items = match self
            .fetcher
            .fetch_folder_children(owner.client().as_ref(), folder_id)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                self.recorder.record_error(
                    &e,
                    task.label(),
                    &format!("Retrieval of child items for folder {folder_id} owned by {} failed", owner.id()),
                    &cid,
                );
                if self.retry_or_abandon(owner, task, parent, attempt, &e, &cid) {
                    debug!(
                        correlation_id = %cid,
                        action = "KILL_TASK",
                        folder_id,
                        "Stopping this attempt, retry scheduled"
                    );
                } else {
                    warn!(
                        correlation_id = %cid,
                        action = "KILL_TASK",
                        folder_id,
                        "Stopping task due to propagated error"
                    );
                }
                return;
            }
        };

        self.stats.bump(Event::FolderListed);
        let tag = if is_root {
            "RETRIEVE_ROOT_ITEMS"
        } else {
            "RETRIEVE_CHILD_ITEMS"
        };
        info!(
            correlation_id = %cid,
            action = tag,
            owner_id = owner.id(),
            folder_id,
            count = items.len(),
            "Retrieved {} items from folder {folder_id}",
            items.len()
        );

        // The starting folder itself is only acted on once, never from recursive steps.
        if first_iteration && !is_root {
            let _ = self.enqueue(
                owner,
                Task::FetchItemAndAct {
                    item_id: folder_id.to_string(),
                    kind: ItemKind::Folder,
                },
                &cid,
            );
        }

        for mut item in items {
            match self.policy.evaluate(owner.id(), folder_id, &item, follow) {
                Decision::SkipNonOwned { audit } => {
                    self.stats.bump(Event::ItemSkipped);
                    debug!(
                        correlation_id = %cid,
                        action = "IGNORE_NONOWNED_ITEM",
                        item_type = %item.kind,
                        item_id = %item.id,
                        item_owner = ?item.owner_id(),
                        "Skipping {} \"{}\" owned by another user",
                        item.kind,
                        item.name
                    );
                    if audit {
                        self.recorder.record_audit(
                            AuditAction::SkipItem,
                            &item,
                            "Successfully retrieved skipped item",
                            &cid,
                        );
                    }
                }
                Decision::SkipDenied => {
                    self.stats.bump(Event::ItemSkipped);
                    warn!(
                        correlation_id = %cid,
                        action = "IGNORE_DENYLIST_ITEM",
                        folder_id = %item.id,
                        "Folder \"{}\" is included in configured denylist - Ignoring",
                        item.name
                    );
                }
                Decision::Accept { recurse } => {
                    item.flatten_metadata();
                    if self.policy.audit_traversal {
                        self.recorder.record_audit(
                            AuditAction::GetItem,
                            &item,
                            "Successfully retrieved item",
                            &cid,
                        );
                    }
                    let child_id = item.id.clone();
                    let _ = self.dispatcher.enqueue_action(owner, item, &cid);
                    if recurse {
                        let _ = self.enqueue(
                            owner,
                            Task::TraverseFolder {
                                folder_id: child_id,
                                first_iteration: false,
                                follow: true,
                            },
                            &cid,
                        );
                        debug!(
                            correlation_id = %cid,
                            action = "ADD_TO_QUEUE",
                            owner_id = owner.id(),
                            queue_size = owner.queue().size(),
                            "Added folder traversal task"
                        );
                    }
                }
            }
        }
    }

    async fn fetch_item_and_act(
        self: &Arc<Self>,
        owner: &Arc<UserContext>,
        task: &Task,
        item_id: &str,
        kind: ItemKind,
        parent: &CorrelationId,
        attempt: u32,
    ) {
        let cid = CorrelationId::new();
        info!(
            correlation_id = %cid,
            parent_correlation_id = %parent,
            action = "PREPARE_ITEM_INFO",
            owner_id = owner.id(),
            item_type = %kind,
            item_id,
            attempt,
            "Getting info for {kind} {item_id}"
        );

        let mut item = match self
            .fetcher
            .fetch_item(owner.client().as_ref(), item_id, kind)
            .await
        {
            Ok(item) => item,
            Err(e) if e.is_rate_limited() => {
                self.recorder.record_error(
                    &e,
                    task.label(),
                    &format!("Request for {kind} \"{item_id}\" rate limited -- Re-adding task to queue"),
                    &cid,
                );
                self.retry_or_abandon(owner, task, parent, attempt, &e, &cid);
                return;
            }
            Err(e) => {
                self.stats.bump(Event::Abandoned);
                self.recorder.record_error(
                    &e,
                    task.label(),
                    &format!("retrieval of info for {kind} {item_id} owned by {}", owner.id()),
                    &cid,
                );
                return;
            }
        };

        self.stats.bump(Event::ItemFetched);
        item.flatten_metadata();
        if self.policy.audit_traversal {
            self.recorder.record_audit(
                AuditAction::GetItem,
                &item,
                "Successfully retrieved item",
                &cid,
            );
        }
        let _ = self.dispatcher.enqueue_action(owner, item, &cid);
    }

    /// Re-enqueues `task` with backoff, or abandons it past the ceiling. Returns whether a
    /// retry was scheduled.
    fn retry_or_abandon(
        self: &Arc<Self>,
        owner: &Arc<UserContext>,
        task: &Task,
        parent: &CorrelationId,
        attempt: u32,
        error: &ApiError,
        cid: &CorrelationId,
    ) -> bool {
        let next = attempt + 1;
        if next > self.retry.max_attempts {
            self.stats.bump(Event::Abandoned);
            error!(
                correlation_id = %cid,
                action = "KILL_TASK",
                owner_id = owner.id(),
                task = ?task,
                attempts = attempt,
                "Retry limit reached, abandoning task: {error}"
            );
            return false;
        }

        self.stats.bump(Event::Retry);
        let delay = self.retry.backoff(next, error.retry_after());
        let _ = self.enqueue_attempt(owner, task.clone(), parent.clone(), next, Some(delay));
        debug!(
            correlation_id = %cid,
            action = "ADD_TO_QUEUE",
            owner_id = owner.id(),
            attempt = next,
            delay_ms = delay.as_millis() as u64,
            queue_size = owner.queue().size(),
            "Re-added task to queue"
        );
        true
    }
}
