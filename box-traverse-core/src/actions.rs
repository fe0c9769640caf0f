//! Built-in user-defined logic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{TraverseConfig, UserLogicKind};
use crate::contract::{AuditAction, Recorder, UserAction};
use crate::correlation::CorrelationId;
use crate::error::ActionError;
use crate::model::Item;
use crate::registry::UserContext;

/// Does nothing beyond noting that the item was seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAction;

#[async_trait]
impl UserAction for NoopAction {
    async fn perform(
        &self,
        owner: &UserContext,
        item: &Item,
        correlation_id: &CorrelationId,
    ) -> Result<(), ActionError> {
        debug!(
            correlation_id = %correlation_id,
            action = "PREPARE_USER_DEFINED_ACTION",
            owner_id = owner.id(),
            "No user defined logic configured for {} \"{}\"",
            item.kind,
            item.id
        );
        Ok(())
    }
}

/// Changes shared links of one access level to another.
///
/// Items without a shared link never match. With `modify_data` off, the change is only
/// written to the audit trail as a simulation.
pub struct ModifySharedLinks {
    match_access: String,
    new_access: String,
    modify_data: bool,
    fields: Vec<String>,
    recorder: Arc<dyn Recorder>,
}

impl ModifySharedLinks {
    pub fn new(
        match_access: impl Into<String>,
        new_access: impl Into<String>,
        modify_data: bool,
        fields: Vec<String>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            match_access: match_access.into(),
            new_access: new_access.into(),
            modify_data,
            fields,
            recorder,
        }
    }
}

#[async_trait]
impl UserAction for ModifySharedLinks {
    async fn perform(
        &self,
        owner: &UserContext,
        item: &Item,
        correlation_id: &CorrelationId,
    ) -> Result<(), ActionError> {
        let Some(link) = &item.shared_link else {
            return Ok(());
        };
        if link.access != self.match_access {
            return Ok(());
        }

        if !self.modify_data {
            let message = format!(
                "Would have modified link {} from {} to {}",
                link.url,
                link.access.to_uppercase(),
                self.new_access.to_uppercase()
            );
            info!(
                correlation_id = %correlation_id,
                action = "SIMULATE_MODIFY_SHARED_LINK",
                item_id = %item.id,
                "{message}"
            );
            self.recorder.record_audit(
                AuditAction::SimulateSharedLinkModify,
                item,
                &message,
                correlation_id,
            );
            return Ok(());
        }

        let updated = owner
            .client()
            .update_shared_link(item, &self.new_access, &self.fields)
            .await?;
        let message = format!(
            "Modified link {} from {} to {}",
            updated.shared_link_url(),
            link.access.to_uppercase(),
            updated.shared_link_access().to_uppercase()
        );
        info!(
            correlation_id = %correlation_id,
            action = "MODIFY_SHARED_LINK",
            item_id = %item.id,
            "{message}"
        );
        self.recorder.record_audit(
            AuditAction::SharedLinkModify,
            &updated,
            &message,
            correlation_id,
        );
        Ok(())
    }
}

/// Builds the action selected by `userDefinedLogic`. Assumes the config has been validated.
pub fn from_config(config: &TraverseConfig, recorder: Arc<dyn Recorder>) -> Arc<dyn UserAction> {
    let logic = &config.user_defined_logic;
    match logic.kind {
        UserLogicKind::None => Arc::new(NoopAction),
        UserLogicKind::ModifySharedLinks => Arc::new(ModifySharedLinks::new(
            logic.match_shared_link_access_level.clone().unwrap_or_default(),
            logic.new_shared_link_access_level.clone().unwrap_or_default(),
            config.modify_data,
            config.box_item_fields.clone(),
            recorder,
        )),
    }
}
