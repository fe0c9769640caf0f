//! In-memory Box tenant used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use box_traverse_core::contract::{
    AuditAction, Authenticator, ContentClient, MockContentClient, MockServiceAccount, Page,
    Recorder, ServiceAccount, UserAction,
};
use box_traverse_core::correlation::CorrelationId;
use box_traverse_core::error::{ActionError, ApiError};
use box_traverse_core::model::{Item, ItemKind, UserProfile, UserRef};
use box_traverse_core::registry::UserContext;

pub fn item(id: &str, kind: ItemKind, owner: &str) -> Item {
    let mut item = Item::new(id, kind, format!("{kind}-{id}"));
    item.owned_by = Some(UserRef {
        id: owner.into(),
        name: owner.into(),
        login: format!("{}@example.com", owner.to_lowercase()),
    });
    item
}

pub fn folder(id: &str, owner: &str) -> Item {
    item(id, ItemKind::Folder, owner)
}

pub fn file(id: &str, owner: &str) -> Item {
    item(id, ItemKind::File, owner)
}

pub fn rate_limited() -> ApiError {
    ApiError::RateLimited {
        code: Some("rate_limit_exceeded".into()),
        message: "Request rate limit exceeded".into(),
        retry_after: Some(Duration::from_secs(1)),
    }
}

/// Folder contents and item metadata visible to one user, plus call counters.
#[derive(Default)]
pub struct Tree {
    children: HashMap<String, Vec<Item>>,
    items: HashMap<String, Item>,
    listing_failures: Mutex<HashMap<String, usize>>,
    pub listed: Mutex<Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `folder_id` with `children`. Every child also becomes fetchable by id.
    pub fn with_folder(mut self, folder_id: &str, children: Vec<Item>) -> Self {
        for child in &children {
            self.items.insert(child.id.clone(), child.clone());
        }
        self.children.insert(folder_id.to_string(), children);
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.insert(item.id.clone(), item);
        self
    }

    /// The next `times` listings of `folder_id` answer 429.
    pub fn rate_limit_listing(self, folder_id: &str, times: usize) -> Self {
        self.listing_failures
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), times);
        self
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn times_listed(&self, folder_id: &str) -> usize {
        self.listed().iter().filter(|id| *id == folder_id).count()
    }

    fn list(&self, folder_id: &str) -> Result<Page<Item>, ApiError> {
        self.listed.lock().unwrap().push(folder_id.to_string());
        if let Some(left) = self.listing_failures.lock().unwrap().get_mut(folder_id) {
            if *left > 0 {
                *left -= 1;
                return Err(rate_limited());
            }
        }
        match self.children.get(folder_id) {
            Some(children) => Ok(Page {
                entries: children.clone(),
                next: None,
                total_count: Some(children.len() as u64),
            }),
            None => Err(ApiError::Request {
                status: 404,
                code: Some("not_found".into()),
                message: format!("folder {folder_id} not found"),
            }),
        }
    }

    fn get(&self, id: &str) -> Result<Item, ApiError> {
        self.fetched.lock().unwrap().push(id.to_string());
        self.items.get(id).cloned().ok_or_else(|| ApiError::Request {
            status: 404,
            code: Some("not_found".into()),
            message: format!("item {id} not found"),
        })
    }
}

/// A mocked client for `profile` backed by `tree`.
pub fn client(profile: UserProfile, tree: Arc<Tree>) -> MockContentClient {
    let mut client = MockContentClient::new();
    client
        .expect_current_user()
        .returning(move || Ok(profile.clone()));
    let listing = Arc::clone(&tree);
    client
        .expect_list_folder_children()
        .returning(move |folder_id, _, _| listing.list(folder_id));
    client
        .expect_get_item()
        .returning(move |id, _, _| tree.get(id));
    client
}

pub fn directory(users: Vec<UserProfile>) -> MockServiceAccount {
    let mut service = MockServiceAccount::new();
    service.expect_list_enterprise_users().returning(move |_| {
        Ok(Page {
            entries: users.clone(),
            next: None,
            total_count: Some(users.len() as u64),
        })
    });
    service
}

/// Hands out one prepared client per user id.
#[derive(Default)]
pub struct FakeAuth {
    clients: HashMap<String, Arc<dyn ContentClient>>,
    service: Option<Arc<dyn ServiceAccount>>,
}

impl FakeAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: &str, client: MockContentClient) -> Self {
        self.clients.insert(user_id.to_string(), Arc::new(client));
        self
    }

    pub fn with_service(mut self, service: MockServiceAccount) -> Self {
        self.service = Some(Arc::new(service));
        self
    }
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn user_client(&self, user_id: &str) -> Result<Arc<dyn ContentClient>, ApiError> {
        self.clients
            .get(user_id)
            .cloned()
            .ok_or_else(|| ApiError::Request {
                status: 404,
                code: Some("not_found".into()),
                message: format!("user {user_id} not found"),
            })
    }

    async fn service_account(&self) -> Result<Arc<dyn ServiceAccount>, ApiError> {
        self.service
            .clone()
            .ok_or_else(|| ApiError::Transport("no service account in this test".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub action: AuditAction,
    pub item_id: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRow {
    pub origin: String,
    pub rate_limited: bool,
}

#[derive(Default)]
pub struct CollectingRecorder {
    pub audits: Mutex<Vec<AuditRow>>,
    pub errors: Mutex<Vec<ErrorRow>>,
}

impl CollectingRecorder {
    pub fn audits(&self) -> Vec<AuditRow> {
        self.audits.lock().unwrap().clone()
    }

    pub fn audited(&self, action: AuditAction) -> Vec<String> {
        let mut ids: Vec<String> = self
            .audits()
            .into_iter()
            .filter(|row| row.action == action)
            .map(|row| row.item_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn errors(&self) -> Vec<ErrorRow> {
        self.errors.lock().unwrap().clone()
    }
}

impl Recorder for CollectingRecorder {
    fn record_audit(
        &self,
        action: AuditAction,
        item: &Item,
        _message: &str,
        correlation_id: &CorrelationId,
    ) {
        self.audits.lock().unwrap().push(AuditRow {
            action,
            item_id: item.id.clone(),
            correlation_id: correlation_id.to_string(),
        });
    }

    fn record_error(
        &self,
        error: &ApiError,
        origin: &str,
        _description: &str,
        _correlation_id: &CorrelationId,
    ) {
        self.errors.lock().unwrap().push(ErrorRow {
            origin: origin.to_string(),
            rate_limited: error.is_rate_limited(),
        });
    }
}

/// Records every (owner, item) pair it is called with, optionally taking some time per call.
#[derive(Default)]
pub struct CollectingAction {
    pub performed: Mutex<Vec<(String, String)>>,
    pub delay: Option<Duration>,
}

impl CollectingAction {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn items(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .performed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item)| item.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.performed.lock().unwrap().len()
    }
}

#[async_trait]
impl UserAction for CollectingAction {
    async fn perform(
        &self,
        owner: &UserContext,
        item: &Item,
        _correlation_id: &CorrelationId,
    ) -> Result<(), ActionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.performed
            .lock()
            .unwrap()
            .push((owner.id().to_string(), item.id.clone()));
        Ok(())
    }
}
