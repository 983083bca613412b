//! API middleware
//!
//! Contains:
//! - Shared application state and the per-family router state
//! - The JSON error envelope
//! - Session cookie handling
//! - Session loading and the authentication gate

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::proxy::Backend;
use crate::cache::Cache;
use crate::config::Config;
use crate::models::{Session, SessionFamily, SessionId, SessionUser};
use crate::services::{AuthError, AuthService, SessionStore, AUDIT_TARGET};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub citizen_auth: Arc<AuthService>,
    pub employee_auth: Arc<AuthService>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Build the state on top of a cache backend shared by both session families
    pub fn new(config: Config, cache: Arc<Cache>) -> anyhow::Result<Self> {
        let ttl = config.sessions.timeout();
        let citizen_auth = AuthService::new(SessionStore::new(cache.clone(), SessionFamily::Citizen, ttl));
        let employee_auth = AuthService::new(SessionStore::new(cache, SessionFamily::Employee, ttl));

        let http_client = reqwest::Client::builder()
            .timeout(config.service.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            config: Arc::new(config),
            citizen_auth: Arc::new(citizen_auth),
            employee_auth: Arc::new(employee_auth),
            http_client,
        })
    }

    /// State of the router serving one session family
    pub fn family(&self, family: SessionFamily) -> FamilyState {
        let sessions = &self.config.sessions;
        let (auth, cookie_name, backend_prefix) = match family {
            SessionFamily::Citizen => (&self.citizen_auth, &sessions.citizen_cookie_name, "/citizen"),
            SessionFamily::Employee => (&self.employee_auth, &sessions.employee_cookie_name, "/employee"),
        };

        FamilyState {
            auth: auth.clone(),
            cookie: SessionCookie {
                name: cookie_name.clone(),
                secure: sessions.cookie_secure,
                max_age_secs: sessions.timeout().as_secs(),
            },
            backend: Backend::new(self.http_client.clone(), &self.config.service.url, backend_prefix),
            dev_auth: self.config.dev_auth.enabled,
            integration_token: self.config.integration.token.clone(),
        }
    }
}

/// State of the router serving one session family
#[derive(Clone)]
pub struct FamilyState {
    pub auth: Arc<AuthService>,
    pub cookie: SessionCookie,
    pub backend: Backend,
    pub dev_auth: bool,
    /// Bearer token of the identity provider integration
    pub integration_token: Option<String>,
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new("PAYLOAD_TOO_LARGE", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new("BAD_GATEWAY", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "PAYLOAD_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            "BAD_GATEWAY" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidUser(message) => ApiError::validation_error(message),
            AuthError::Identity(e) => {
                tracing::error!("Session user cannot be forwarded: {}", e);
                ApiError::internal_error("Internal server error")
            }
            AuthError::Store(e) => {
                tracing::error!("Session store failure: {:#}", e);
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

/// Session cookie settings of one family
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub name: String,
    pub secure: bool,
    pub max_age_secs: u64,
}

impl SessionCookie {
    /// Read the session id from the `Cookie` request headers
    pub fn extract(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|cookie| cookie.trim().split_once('='))
            .find(|(name, value)| *name == self.name && !value.is_empty())
            .map(|(_, value)| SessionId::from(value.to_string()))
    }

    /// `Set-Cookie` value handing out a session id
    pub fn set(&self, id: &SessionId) -> String {
        self.build(id.as_str(), self.max_age_secs)
    }

    /// `Set-Cookie` value removing the session cookie
    pub fn clear(&self) -> String {
        self.build("", 0)
    }

    fn build(&self, value: &str, max_age_secs: u64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, value, max_age_secs
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Session resolved from the request cookie, if any
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

impl CurrentSession {
    pub fn user(&self) -> Option<&SessionUser> {
        self.0.as_ref().and_then(Session::authenticated_user)
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentSession>().cloned().unwrap_or_default())
    }
}

/// Authenticated user, available behind `require_authentication`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub SessionUser);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
    }
}

/// Session loading middleware
///
/// Resolves the family's session cookie and attaches a `CurrentSession`.
/// Unknown or expired ids resolve to no session.
pub async fn load_session(
    State(state): State<FamilyState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = match state.cookie.extract(request.headers()) {
        Some(id) => state
            .auth
            .store()
            .load(&id)
            .await
            .map_err(|e| ApiError::from(AuthError::Store(e)))?,
        None => None,
    };

    request.extensions_mut().insert(CurrentSession(session));
    Ok(next.run(request).await)
}

/// Authentication middleware
///
/// Passes the request on only when the session carries a user with an id.
/// Successfully handled requests extend the session lifetime.
pub async fn require_authentication(
    State(state): State<FamilyState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let current = request.extensions().get::<CurrentSession>().cloned().unwrap_or_default();

    let Some(user) = current.user().cloned() else {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.not_found",
            path = %request.uri().path(),
            "Could not find user"
        );
        return Err(ApiError::unauthorized("Unauthorized"));
    };

    request.extensions_mut().insert(AuthenticatedUser(user));
    let response = next.run(request).await;

    if !response.status().is_client_error() && !response.status().is_server_error() {
        if let Some(session) = &current.0 {
            match state.auth.store().touch(session).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!("Session ended while the request was handled"),
                Err(e) => tracing::error!("Failed to extend session: {:#}", e),
            }
        }
    }

    Ok(response)
}
