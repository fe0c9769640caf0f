//! Hands accepted items to the user-defined action, always through the owner's queue.

use std::sync::Arc;

use tracing::{debug, error};

use crate::contract::{Recorder, UserAction};
use crate::correlation::CorrelationId;
use crate::error::ActionError;
use crate::model::Item;
use crate::queue::TaskHandle;
use crate::registry::UserContext;
use crate::stats::{Event, TraversalStats};

#[derive(Clone)]
pub struct ActionDispatcher {
    action: Arc<dyn UserAction>,
    recorder: Arc<dyn Recorder>,
    stats: Arc<TraversalStats>,
}

impl ActionDispatcher {
    pub fn new(
        action: Arc<dyn UserAction>,
        recorder: Arc<dyn Recorder>,
        stats: Arc<TraversalStats>,
    ) -> Self {
        Self {
            action,
            recorder,
            stats,
        }
    }

    /// Queues one run of the action for `item` on `owner`'s queue.
    ///
    /// Errors from the action are recorded inside the task; the returned handle only ever
    /// resolves with `Err` if the task itself panicked.
    pub fn enqueue_action(
        &self,
        owner: &Arc<UserContext>,
        item: Item,
        parent: &CorrelationId,
    ) -> TaskHandle<()> {
        let action = Arc::clone(&self.action);
        let recorder = Arc::clone(&self.recorder);
        let stats = Arc::clone(&self.stats);
        let ctx = Arc::clone(owner);
        let parent_id = parent.clone();

        let handle = owner.queue().add(async move {
            let correlation_id = CorrelationId::new();
            debug!(
                correlation_id = %correlation_id,
                parent_correlation_id = %parent_id,
                action = "PREPARE_USER_DEFINED_ACTION",
                item_type = %item.kind,
                item_id = %item.id,
                "Running user defined action"
            );
            match action.perform(&ctx, &item, &correlation_id).await {
                Ok(()) => {}
                Err(ActionError::Api(e)) => {
                    stats.bump(Event::ActionFailed);
                    recorder.record_error(
                        &e,
                        "performUserDefinedActions",
                        &format!("user defined action for {} {}", item.kind, item.id),
                        &correlation_id,
                    );
                }
                Err(ActionError::Other(message)) => {
                    stats.bump(Event::ActionFailed);
                    error!(
                        correlation_id = %correlation_id,
                        action = "UNKNOWN_ERROR",
                        item_id = %item.id,
                        "User defined action failed: {message}"
                    );
                }
            }
        });

        self.stats.bump(Event::ItemDispatched);
        debug!(
            correlation_id = %parent,
            action = "ADD_TO_QUEUE",
            owner_id = owner.id(),
            queue_size = owner.queue().size(),
            "Added user defined action task"
        );
        handle
    }
}
