//! Top-level orchestration of one traversal run.
//!
//! [`traverse`] wires the pieces together in this order:
//!   - validates the config and picks the enumeration mode
//!   - builds the engine, the registry and the users queue
//!   - enumerates target users (directory, allow-list or CSV rows)
//!   - hands every target to the [`UsersTaskQueue`]
//!   - seals enumeration and waits for global completion
//!
//! # Error Handling
//! Only setup problems are returned as errors: invalid config, an unreachable service
//! account, or a failed user enumeration. Anything that goes wrong inside a user's traversal
//! is recorded and counted in the returned [`RunSummary`] instead.

use std::sync::Arc;

use tracing::info;

use crate::completion::CompletionTracker;
use crate::config::{EnumerationMode, TraverseConfig};
use crate::contract::{Authenticator, Recorder, UserAction};
use crate::dispatcher::ActionDispatcher;
use crate::engine::TraversalEngine;
use crate::enumerate::{self, UserTarget};
use crate::error::TraverseError;
use crate::fetcher::ItemFetcher;
use crate::input::CsvRow;
use crate::policy::Policy;
use crate::queue::{QueueOptions, RateLimitedQueue};
use crate::registry::UserRegistry;
use crate::stats::{RunSummary, TraversalStats};
use crate::users_queue::UsersTaskQueue;

/// External collaborators of a run.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn Authenticator>,
    pub recorder: Arc<dyn Recorder>,
    pub action: Arc<dyn UserAction>,
}

/// Runs a traversal to global completion. `csv_rows` is only used in CSV mode.
pub async fn traverse(
    config: &TraverseConfig,
    csv_rows: Vec<CsvRow>,
    services: Services,
) -> Result<RunSummary, TraverseError> {
    let mode = config.validate()?;
    info!(mode = ?mode, "[TRAVERSE] Starting traversal");

    let stats = Arc::new(TraversalStats::default());
    let policy = Policy::from_config(config);
    let fetcher = ItemFetcher::new(
        config.box_item_fields.clone(),
        config.page_size,
        config.pagination,
    );
    let dispatcher = ActionDispatcher::new(
        Arc::clone(&services.action),
        Arc::clone(&services.recorder),
        Arc::clone(&stats),
    );
    let engine = TraversalEngine::new(
        fetcher,
        policy.clone(),
        config.retry.clone(),
        Arc::clone(&services.recorder),
        dispatcher,
        Arc::clone(&stats),
    );

    let registry = Arc::new(UserRegistry::new(QueueOptions::per_second(
        config.max_queue_tasks_per_second,
    )));
    let users_queue = RateLimitedQueue::new(QueueOptions::concurrency(config.max_concurrent_users));
    let tracker = CompletionTracker::new(Arc::clone(&registry), users_queue.clone());
    let users = UsersTaskQueue::new(
        users_queue,
        Arc::clone(&services.auth),
        Arc::clone(&registry),
        engine,
        Arc::clone(&tracker),
        Arc::clone(&services.recorder),
    );

    let targets = enumerate_targets(config, mode, csv_rows, &services, &policy, &stats).await?;
    info!(
        correlation_id = "N/A",
        action = "INITIALIZE_TRAVERSAL_TASKS",
        users = targets.len(),
        "Preparing to create traverse tasks for all items"
    );
    for target in targets {
        let _ = users.add_user_task(target);
    }
    tracker.seal();
    info!(
        correlation_id = "N/A",
        action = "TRAVERSAL_TASKS_INITIALIZED",
        "All traverse tasks have been created and are pending completion"
    );

    tracker.finished().await;
    let summary = stats.snapshot();
    info!(summary = ?summary, "[TRAVERSE] Traversal complete");
    Ok(summary)
}

async fn enumerate_targets(
    config: &TraverseConfig,
    mode: EnumerationMode,
    csv_rows: Vec<CsvRow>,
    services: &Services,
    policy: &Policy,
    stats: &TraversalStats,
) -> Result<Vec<UserTarget>, TraverseError> {
    match mode {
        EnumerationMode::Allowlist => {
            info!(
                correlation_id = "N/A",
                action = "ALLOWLIST",
                "Preparing to iterate through allowlist"
            );
            Ok(enumerate::allowlist_targets(&config.allowlist, stats))
        }
        EnumerationMode::Directory => {
            let service = services
                .auth
                .service_account()
                .await
                .map_err(TraverseError::ServiceAccount)?;
            enumerate::directory_targets(service.as_ref(), policy, config.page_size, stats)
                .await
                .map_err(TraverseError::Enumeration)
        }
        EnumerationMode::Csv => {
            let service = services
                .auth
                .service_account()
                .await
                .map_err(TraverseError::ServiceAccount)?;
            enumerate::csv_targets(service.as_ref(), csv_rows, config.page_size, stats)
                .await
                .map_err(TraverseError::Enumeration)
        }
    }
}
