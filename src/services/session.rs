//! Session store
//!
//! Persists sessions and logout-token mappings in the cache backend.
//! Keys are namespaced per session family:
//! - `<family>:sess:<session id>` holds the serialized `Session`
//! - `<family>:slo:<logout token>` holds the id of the session the token ends
//!
//! Both kinds of entry carry the session timeout as TTL, so expiry is
//! enforced by the backend. Every read may come back empty.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::models::{Session, SessionFamily, SessionId};

/// Session store for one session family
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache: Arc<Cache>,
    family: SessionFamily,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<Cache>, family: SessionFamily, ttl: Duration) -> Self {
        Self { cache, family, ttl }
    }

    pub fn family(&self) -> SessionFamily {
        self.family
    }

    fn session_key(&self, id: &SessionId) -> String {
        format!("{}:sess:{}", self.family.key_prefix(), id.as_str())
    }

    fn logout_token_key(&self, token: &str) -> String {
        format!("{}:slo:{}", self.family.key_prefix(), token)
    }

    /// Load a session by id
    pub async fn load(&self, id: &SessionId) -> Result<Option<Session>> {
        self.cache
            .get(&self.session_key(id))
            .await
            .context("Failed to load session")
    }

    /// Store a session, restarting its TTL
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.cache
            .set(&self.session_key(&session.id), session, self.ttl)
            .await
            .context("Failed to save session")
    }

    /// Delete a session. A missing session is not an error.
    pub async fn destroy(&self, id: &SessionId) -> Result<()> {
        self.cache
            .delete(&self.session_key(id))
            .await
            .context("Failed to destroy session")
    }

    /// Extend the lifetime of a session and of its logout token mapping.
    ///
    /// Only the TTL is restarted, so a session destroyed in the meantime stays
    /// destroyed. Returns whether the session still existed.
    pub async fn touch(&self, session: &Session) -> Result<bool> {
        let alive = self
            .cache
            .expire(&self.session_key(&session.id), self.ttl)
            .await
            .context("Failed to extend session")?;

        if alive {
            if let Some(token) = &session.logout_token {
                self.cache
                    .expire(&self.logout_token_key(&token.value), self.ttl)
                    .await
                    .context("Failed to extend logout token")?;
            }
        }

        Ok(alive)
    }

    /// Map a logout token to a session id
    pub async fn save_logout_token(&self, token: &str, session_id: &SessionId) -> Result<()> {
        self.cache
            .set(&self.logout_token_key(token), session_id, self.ttl)
            .await
            .context("Failed to save logout token")
    }

    /// Remove a logout token and return the session it pointed to.
    ///
    /// Unknown, expired and already consumed tokens yield `None`. Of several
    /// concurrent consumers at most one receives the session id.
    pub async fn consume_logout_token(&self, token: &str) -> Result<Option<SessionId>> {
        self.cache
            .take(&self.logout_token_key(token))
            .await
            .context("Failed to consume logout token")
    }
}
