//! Process-wide table of per-user processing contexts.
//!
//! A [`UserContext`] is built once per user and handed to every task created for that user,
//! so tasks never look anything up by id. The registry only exists to keep registration
//! idempotent and to answer "is anyone still working?" for completion tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::contract::ContentClient;
use crate::error::RegistryError;
use crate::model::UserProfile;
use crate::queue::{QueueOptions, RateLimitedQueue};

/// Everything a task needs to act as one user.
pub struct UserContext {
    profile: UserProfile,
    client: Arc<dyn ContentClient>,
    queue: RateLimitedQueue,
    processing: AtomicBool,
}

impl UserContext {
    /// Builds a context with a fresh queue. Registration goes through
    /// [`UserRegistry::add_user`]; this is public so tests can build one directly.
    pub fn new(profile: UserProfile, client: Arc<dyn ContentClient>, options: QueueOptions) -> Self {
        Self {
            profile,
            client,
            queue: RateLimitedQueue::new(options),
            processing: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn client(&self) -> &Arc<dyn ContentClient> {
        &self.client
    }

    pub fn queue(&self) -> &RateLimitedQueue {
        &self.queue
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("profile", &self.profile)
            .field("queue", &self.queue)
            .field("processing", &self.is_processing())
            .finish()
    }
}

/// Result of [`UserRegistry::add_user`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub context: Arc<UserContext>,
    /// `false` when the user was already registered and the existing context was returned.
    pub created: bool,
}

pub struct UserRegistry {
    users: Mutex<HashMap<String, Arc<UserContext>>>,
    queue_options: QueueOptions,
}

impl UserRegistry {
    pub fn new(queue_options: QueueOptions) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            queue_options,
        }
    }

    fn users(&self) -> MutexGuard<'_, HashMap<String, Arc<UserContext>>> {
        // A poisoned map is still structurally valid; keep going.
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `profile` with its client and a new queue, or returns the existing entry.
    ///
    /// The existence check and the insert happen under one lock, so two flows registering
    /// the same user can never produce two queues.
    pub fn add_user(
        &self,
        profile: UserProfile,
        client: Arc<dyn ContentClient>,
    ) -> Result<Registration, RegistryError> {
        if profile.id.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "user profile has no id".to_string(),
            ));
        }

        let mut users = self.users();
        if let Some(existing) = users.get(&profile.id) {
            debug!(owner_id = %profile.id, "User already registered, reusing existing queue");
            return Ok(Registration {
                context: Arc::clone(existing),
                created: false,
            });
        }

        let context = Arc::new(UserContext::new(
            profile,
            client,
            self.queue_options.clone(),
        ));
        users.insert(context.id().to_string(), Arc::clone(&context));
        Ok(Registration {
            context,
            created: true,
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Arc<UserContext>, RegistryError> {
        self.users()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn check_user(&self, id: &str) -> bool {
        self.users().contains_key(id)
    }

    pub fn active_processing_users(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .users()
            .values()
            .filter(|ctx| ctx.is_processing())
            .map(|ctx| ctx.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// True when every registered queue has nothing queued or running right now.
    pub fn all_drained(&self) -> bool {
        self.users().values().all(|ctx| ctx.queue().is_idle())
    }

    pub fn len(&self) -> usize {
        self.users().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
