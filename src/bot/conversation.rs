//! Per-user thread cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bot::database::Database;

/// Storage for the user -> thread id mapping.
#[async_trait]
pub trait ConversationState: Send + Sync {
    async fn thread_id(&self, user_id: i64) -> Option<String>;
    async fn remember(&self, user_id: i64, thread_id: &str);
    async fn forget(&self, user_id: i64);
}

#[async_trait]
impl ConversationState for Database {
    async fn thread_id(&self, user_id: i64) -> Option<String> {
        match self.thread_for_user(user_id) {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Failed to read thread for user {}: {e}", user_id);
                None
            }
        }
    }

    async fn remember(&self, user_id: i64, thread_id: &str) {
        if let Err(e) = self.set_thread_for_user(user_id, thread_id) {
            warn!("Failed to store thread for user {}: {e}", user_id);
        }
    }

    async fn forget(&self, user_id: i64) {
        if let Err(e) = self.clear_thread_for_user(user_id) {
            warn!("Failed to drop thread for user {}: {e}", user_id);
        }
    }
}

/// Get-or-create of a user's thread, serialized per user.
///
/// Two concurrent first turns of the same user end up on the same thread.
pub struct ThreadCache {
    state: Arc<dyn ConversationState>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ThreadCache {
    pub fn new(state: Arc<dyn ConversationState>) -> Self {
        Self {
            state,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create<F, Fut, E>(&self, user_id: i64, create: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let user_lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(user_id).or_default().clone()
        };

        let result = {
            let _guard = user_lock.lock().await;
            self.lookup_or_create(user_id, create).await
        };

        // Drop the entry once nobody else is waiting on it.
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&user_lock) == 2 {
            locks.remove(&user_id);
        }
        result
    }

    async fn lookup_or_create<F, Fut, E>(&self, user_id: i64, create: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(thread_id) = self.state.thread_id(user_id).await {
            return Ok(thread_id);
        }

        let thread_id = create().await?;
        info!("Started thread {} for user {}", thread_id, user_id);
        self.state.remember(user_id, &thread_id).await;
        Ok(thread_id)
    }

    /// Stop using the user's thread; the next turn starts a new one.
    pub async fn forget(&self, user_id: i64) {
        info!("Dropping thread of user {}", user_id);
        self.state.forget(user_id).await;
    }
}
