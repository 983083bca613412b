//! Auth service
//!
//! Session lifecycle around authentication:
//! - `establish_session` completes a login. The session id is always
//!   regenerated so an id handed out before login never carries a user.
//! - `tear_down_session` ends the session behind the browser's cookie.
//! - `logout_by_token` ends a session on request of the identity provider.
//!
//! Concurrent logouts of the same session are not serialized. Every
//! destructive step is idempotent instead.

use crate::models::{FederatedProfile, Session, SessionFamily, SessionId, SessionUser};
use crate::services::identity::{serialize_identity, IdentityError};
use crate::services::session::SessionStore;

/// Target of audit events
pub const AUDIT_TARGET: &str = "audit";

/// Error types for auth service operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The user handed over by the login flow cannot hold a session
    #[error("Invalid user: {0}")]
    InvalidUser(String),

    /// The session user cannot be turned into a backend identity
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Session store I/O failed
    #[error("Session store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Auth service for one session family
#[derive(Debug, Clone)]
pub struct AuthService {
    store: SessionStore,
}

impl AuthService {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn family(&self) -> SessionFamily {
        self.store.family()
    }

    fn validate_user(&self, user: &SessionUser) -> Result<(), AuthError> {
        if user.id().is_none() {
            return Err(AuthError::InvalidUser("user has no id".to_string()));
        }
        let user_type = user
            .user_type
            .ok_or_else(|| AuthError::InvalidUser("user has no user type".to_string()))?;
        if !self.family().allows(user_type) {
            return Err(AuthError::InvalidUser(format!(
                "{} cannot hold a {} session",
                user_type,
                self.family().key_prefix()
            )));
        }
        // Fail at login rather than on the first proxied request
        serialize_identity(user)?;
        Ok(())
    }

    /// Complete a login.
    ///
    /// On success the returned session is stored under a fresh id and
    /// `previous`, if any, no longer resolves. On failure the store is
    /// left as it was: the new session is removed before the error is
    /// returned.
    pub async fn establish_session(
        &self,
        previous: Option<&Session>,
        user: SessionUser,
        profile: Option<&FederatedProfile>,
    ) -> Result<Session, AuthError> {
        self.validate_user(&user)?;

        let mut session = Session::new()?;
        session.user = Some(user);
        session.logout_token = profile.map(FederatedProfile::logout_token);

        self.store.save(&session).await?;

        if let Err(e) = self.replace_previous(previous, &session).await {
            tracing::error!("Login failed, rolling back new session: {}", e);
            if let Err(cleanup) = self.store.destroy(&session.id).await {
                tracing::error!("Failed to roll back new session: {}", cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.login",
            family = self.family().key_prefix(),
            user_id = session.user.as_ref().and_then(|u| u.id()),
            "User logged in"
        );

        Ok(session)
    }

    async fn replace_previous(&self, previous: Option<&Session>, session: &Session) -> Result<(), AuthError> {
        if let Some(token) = &session.logout_token {
            self.store.save_logout_token(&token.value, &session.id).await?;
        }

        let Some(previous) = previous else {
            return Ok(());
        };

        self.store.destroy(&previous.id).await?;

        // A stale mapping only points at a deleted session, so this is best effort
        let new_token = session.logout_token.as_ref().map(|t| t.value.as_str());
        if let Some(old) = &previous.logout_token {
            if Some(old.value.as_str()) != new_token {
                if let Err(e) = self.store.consume_logout_token(&old.value).await {
                    tracing::warn!("Failed to drop logout token of replaced session: {}", e);
                }
            }
        }

        Ok(())
    }

    /// End the current session.
    ///
    /// The logout token is read before the session is destroyed and consumed
    /// afterwards. A missing session or token is treated as already logged out.
    pub async fn tear_down_session(&self, current: Option<&Session>) -> Result<(), AuthError> {
        let Some(session) = current else {
            return Ok(());
        };
        let logout_token = session.logout_token.clone();

        self.store.destroy(&session.id).await?;

        if let Some(token) = logout_token {
            self.store.consume_logout_token(&token.value).await?;
        }

        tracing::info!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.logout",
            family = self.family().key_prefix(),
            user_id = session.user.as_ref().and_then(|u| u.id()),
            "User logged out"
        );

        Ok(())
    }

    /// End the session a logout token points to.
    ///
    /// Returns the id of the session that was ended, `None` when the token
    /// was unknown, expired or already used.
    pub async fn logout_by_token(&self, profile: &FederatedProfile) -> Result<Option<SessionId>, AuthError> {
        let token = profile.logout_token_value();

        let Some(session_id) = self.store.consume_logout_token(&token).await? else {
            tracing::debug!("Logout token not found, nothing to do");
            return Ok(None);
        };

        self.store.destroy(&session_id).await?;

        tracing::info!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.logout",
            family = self.family().key_prefix(),
            "Session ended by identity provider"
        );

        Ok(Some(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};
    use crate::models::UserType;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(family: SessionFamily) -> AuthService {
        let cache = Arc::new(Cache::Memory(MemoryCache::new()));
        AuthService::new(SessionStore::new(cache, family, Duration::from_secs(60)))
    }

    fn profile() -> FederatedProfile {
        FederatedProfile {
            name_id: "name-1".to_string(),
            session_index: "idx-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_regenerates_session_id() {
        let auth = service(SessionFamily::Citizen);
        let anonymous = Session::new().unwrap();
        auth.store().save(&anonymous).await.unwrap();

        let session = auth
            .establish_session(Some(&anonymous), SessionUser::citizen("c1"), None)
            .await
            .unwrap();

        assert_ne!(session.id, anonymous.id);
        assert!(auth.store().load(&anonymous.id).await.unwrap().is_none());
        let stored = auth.store().load(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.user, Some(SessionUser::citizen("c1")));
    }

    #[tokio::test]
    async fn test_login_stores_logout_token() {
        let auth = service(SessionFamily::Employee);
        let user = SessionUser::employee("e1", vec!["ADMIN".to_string()], vec![]);

        let session = auth.establish_session(None, user, Some(&profile())).await.unwrap();

        assert_eq!(session.logout_token.as_ref().unwrap().value, "name-1:::idx-1");
        assert_eq!(
            auth.store().consume_logout_token("name-1:::idx-1").await.unwrap(),
            Some(session.id)
        );
    }

    #[tokio::test]
    async fn test_login_rejects_user_without_id() {
        let auth = service(SessionFamily::Employee);
        let user = SessionUser {
            user_type: Some(UserType::Employee),
            ..SessionUser::default()
        };

        let err = auth.establish_session(None, user, None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidUser(_)));
    }

    #[tokio::test]
    async fn test_login_rejects_user_without_type() {
        let auth = service(SessionFamily::Citizen);
        let user = SessionUser {
            id: Some("c1".to_string()),
            ..SessionUser::default()
        };

        let err = auth.establish_session(None, user, None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidUser(_)));
    }

    #[tokio::test]
    async fn test_login_rejects_user_of_other_family() {
        let auth = service(SessionFamily::Citizen);
        let anonymous = Session::new().unwrap();
        auth.store().save(&anonymous).await.unwrap();

        let err = auth
            .establish_session(Some(&anonymous), SessionUser::system("s"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidUser(_)));
        // The previous session is untouched
        assert!(auth.store().load(&anonymous.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_relogin_drops_old_logout_token() {
        let auth = service(SessionFamily::Citizen);
        let first = auth
            .establish_session(None, SessionUser::citizen("c1"), Some(&profile()))
            .await
            .unwrap();
        let other = FederatedProfile {
            name_id: "name-1".to_string(),
            session_index: "idx-2".to_string(),
        };

        let second = auth
            .establish_session(Some(&first), SessionUser::citizen("c1"), Some(&other))
            .await
            .unwrap();

        assert!(auth.store().load(&first.id).await.unwrap().is_none());
        assert_eq!(auth.store().consume_logout_token("name-1:::idx-1").await.unwrap(), None);
        assert_eq!(
            auth.store().consume_logout_token("name-1:::idx-2").await.unwrap(),
            Some(second.id)
        );
    }

    #[tokio::test]
    async fn test_logout_destroys_session_and_token() {
        let auth = service(SessionFamily::Citizen);
        let session = auth
            .establish_session(None, SessionUser::citizen_weak("c1"), Some(&profile()))
            .await
            .unwrap();

        auth.tear_down_session(Some(&session)).await.unwrap();

        assert!(auth.store().load(&session.id).await.unwrap().is_none());
        assert_eq!(auth.store().consume_logout_token("name-1:::idx-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_without_session_is_ok() {
        let auth = service(SessionFamily::Employee);

        auth.tear_down_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_twice_is_ok() {
        let auth = service(SessionFamily::Employee);
        let session = auth
            .establish_session(None, SessionUser::mobile("m1", None), Some(&profile()))
            .await
            .unwrap();

        auth.tear_down_session(Some(&session)).await.unwrap();
        auth.tear_down_session(Some(&session)).await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_by_token() {
        let auth = service(SessionFamily::Employee);
        let session = auth
            .establish_session(None, SessionUser::employee("e1", vec![], vec![]), Some(&profile()))
            .await
            .unwrap();

        let ended = auth.logout_by_token(&profile()).await.unwrap();
        assert_eq!(ended, Some(session.id.clone()));
        assert!(auth.store().load(&session.id).await.unwrap().is_none());

        // Second callback for the same token is a no-op
        assert_eq!(auth.logout_by_token(&profile()).await.unwrap(), None);
    }
}
