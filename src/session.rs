use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;

use crate::backend::{AuthEvent, AuthUser};

/// In-memory copy of the signed-in user, fed only by the backend's
/// auth-state-change stream. Readers never block and never hit the network;
/// `None` means "not authenticated".
#[derive(Clone, Default)]
pub struct SessionCache {
    user: Arc<RwLock<Option<AuthUser>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.read().as_ref().map(|user| user.id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    pub fn apply(&self, event: &AuthEvent) {
        let mut slot = self
            .user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match event {
            AuthEvent::SignedIn { user } | AuthEvent::TokenRefreshed { user } => {
                tracing::debug!("Session cache: signed in as {}", user.id);
                *slot = Some(user.clone());
            }
            AuthEvent::SignedOut | AuthEvent::UserDeleted => {
                tracing::debug!("Session cache cleared");
                *slot = None;
            }
        }
    }

    /// Drains the subscription on the runtime until the sender side closes.
    pub fn listen(&self, events: flume::Receiver<AuthEvent>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                cache.apply(&event);
            }
            tracing::debug!("Auth event stream closed");
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<AuthUser>> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
