//! # contract: the seams between the engine and the outside world
//!
//! The engine never talks HTTP and never writes files. Everything it consumes is behind one
//! of the traits below:
//!
//! - [`Authenticator`] hands out per-user and service-account clients.
//! - [`ContentClient`] reads items and folder listings as one user.
//! - [`ServiceAccount`] lists enterprise users and uploads the finished report.
//! - [`Recorder`] receives audit rows and classified errors.
//! - [`UserAction`] is the pluggable per-item business logic.
//!
//! ## Mocking & Testing
//! Every trait is annotated for `mockall`, so tests (in this crate and downstream, through
//! the `test-export-mocks` feature) can script API responses deterministically.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tracing::{error, warn};

use crate::correlation::CorrelationId;
use crate::error::{ActionError, ApiError};
use crate::model::{Item, ItemKind, UserProfile};
use crate::registry::UserContext;

/// Position in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// `offset`/`limit`/`total_count` protocol.
    Offset(u64),
    /// `usemarker`/`next_marker` protocol. `None` asks for the first page.
    Marker(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStyle {
    #[default]
    Offset,
    Marker,
}

impl PaginationStyle {
    pub fn first_cursor(&self) -> PageCursor {
        match self {
            PaginationStyle::Offset => PageCursor::Offset(0),
            PaginationStyle::Marker => PageCursor::Marker(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: PageCursor,
    pub limit: u32,
}

/// One page of results. `next` is `None` once the server signals there is nothing more.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub entries: Vec<T>,
    pub next: Option<PageCursor>,
    pub total_count: Option<u64>,
}

/// Read (and minimal write) access to content, authenticated as a single user.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Profile of the user this client acts as.
    async fn current_user(&self) -> Result<UserProfile, ApiError>;

    /// Fetch a single file, folder or web link.
    async fn get_item(
        &self,
        id: &str,
        kind: ItemKind,
        fields: &[String],
    ) -> Result<Item, ApiError>;

    /// Fetch one page of a folder's children.
    async fn list_folder_children(
        &self,
        folder_id: &str,
        fields: &[String],
        page: PageRequest,
    ) -> Result<Page<Item>, ApiError>;

    /// Change the access level of an item's shared link, returning the updated item.
    async fn update_shared_link(
        &self,
        item: &Item,
        access: &str,
        fields: &[String],
    ) -> Result<Item, ApiError>;
}

/// Enterprise-level operations performed as the service account.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ServiceAccount: Send + Sync {
    /// One page of managed enterprise users.
    async fn list_enterprise_users(&self, page: PageRequest) -> Result<Page<UserProfile>, ApiError>;

    /// Single-request upload. Returns the new file id.
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<String, ApiError>;

    /// Upload-session based upload for large files. Returns the new file id.
    async fn upload_file_chunked(
        &self,
        folder_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<String, ApiError>;
}

/// Produces authenticated clients.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn user_client(&self, user_id: &str) -> Result<Arc<dyn ContentClient>, ApiError>;

    async fn service_account(&self) -> Result<Arc<dyn ServiceAccount>, ApiError>;
}

/// Audit actions written to the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    GetItem,
    SkipItem,
    SharedLinkModify,
    SimulateSharedLinkModify,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::GetItem => "GET_ITEM",
            AuditAction::SkipItem => "SKIP_ITEM",
            AuditAction::SharedLinkModify => "SHARED_LINK_MODIFY",
            AuditAction::SimulateSharedLinkModify => "SIMULATE_SHARED_LINK_MODIFY",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for the audit trail and for classified task failures.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Recorder: Send + Sync {
    fn record_audit(
        &self,
        action: AuditAction,
        item: &Item,
        message: &str,
        correlation_id: &CorrelationId,
    );

    /// Logs a task failure. Rate limiting is a warning; everything else is an error.
    fn record_error(
        &self,
        error: &ApiError,
        origin: &str,
        description: &str,
        correlation_id: &CorrelationId,
    ) {
        if error.is_rate_limited() {
            warn!(
                correlation_id = %correlation_id,
                label = origin,
                action = error.action_tag(),
                retry_after = ?error.retry_after(),
                "{description} | {error}"
            );
        } else {
            error!(
                correlation_id = %correlation_id,
                label = origin,
                action = error.action_tag(),
                status = ?error.status(),
                "{description} | {error}"
            );
        }
    }
}

/// The pluggable per-item callback.
///
/// `owner` is the context of the user whose credential is traversing. It is the
/// same user whose queue the action runs on, not necessarily the item's owner.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UserAction: Send + Sync {
    async fn perform(
        &self,
        owner: &UserContext,
        item: &Item,
        correlation_id: &CorrelationId,
    ) -> Result<(), ActionError>;
}
