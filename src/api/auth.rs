//! Authentication API endpoints
//!
//! Mounted under `/auth` of each session family:
//! - GET /auth/status - Current login state
//! - POST /auth/dev/login - Development login (only when enabled)
//! - POST /auth/logout - User logout
//! - POST /auth/saml/logout/callback - Single logout requested by the identity provider
//!
//! `/auth/logout` is mounted outside the session loading layer by
//! [`crate::api::build_family_router`] and reads the session itself.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, CurrentSession, FamilyState};
use crate::api::proxy::bearer_matches;
use crate::models::{FederatedProfile, SessionUser};
use crate::services::{AuthError, AUDIT_TARGET};

/// Response for the login state
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

impl StatusResponse {
    fn for_user(user: Option<&SessionUser>) -> Self {
        Self {
            logged_in: user.is_some(),
            user: user.cloned(),
        }
    }
}

/// Request body for development login
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevLoginRequest {
    pub user: SessionUser,
    pub name_id: Option<String>,
    pub session_index: Option<String>,
}

impl DevLoginRequest {
    fn profile(&self) -> Option<FederatedProfile> {
        match (&self.name_id, &self.session_index) {
            (Some(name_id), Some(session_index)) => Some(FederatedProfile {
                name_id: name_id.clone(),
                session_index: session_index.clone(),
            }),
            _ => None,
        }
    }
}

/// Build auth routes
pub fn router() -> Router<FamilyState> {
    Router::new()
        .route("/status", get(status))
        .route("/dev/login", post(dev_login))
        .route("/saml/logout/callback", post(saml_logout_callback))
}

fn cookie_header(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|e| {
        tracing::error!("Invalid session cookie: {}", e);
        ApiError::internal_error("Internal server error")
    })
}

/// GET /auth/status - Current login state
///
/// Never rejects; anonymous callers get `loggedIn: false`.
async fn status(current: CurrentSession) -> Json<StatusResponse> {
    Json(StatusResponse::for_user(current.user()))
}

/// POST /auth/dev/login - Log in as the given user without an identity provider
///
/// Behaves as if the identity provider had handed over the user: the
/// session is regenerated and the new id set as cookie.
async fn dev_login(
    State(state): State<FamilyState>,
    current: CurrentSession,
    Json(req): Json<DevLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.dev_auth {
        return Err(ApiError::not_found("Not found"));
    }

    let profile = req.profile();
    let session = state
        .auth
        .establish_session(current.0.as_ref(), req.user, profile.as_ref())
        .await?;

    let cookie = cookie_header(&state.cookie.set(&session.id))?;

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(StatusResponse::for_user(session.authenticated_user())),
    ))
}

/// POST /auth/logout - User logout
///
/// The cookie is cleared on every response, including failures of the
/// session store while the session is read.
pub async fn logout(State(state): State<FamilyState>, headers: HeaderMap) -> Response {
    let clear_cookie = cookie_header(&state.cookie.clear());

    let mut response = match end_session(&state, &headers).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    };

    match clear_cookie {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn end_session(state: &FamilyState, headers: &HeaderMap) -> Result<(), AuthError> {
    let current = match state.cookie.extract(headers) {
        Some(id) => state.auth.store().load(&id).await?,
        None => None,
    };
    state.auth.tear_down_session(current.as_ref()).await
}

/// POST /auth/saml/logout/callback - Single logout requested by the identity provider
///
/// Only the identity provider integration may call this, authenticated with
/// the integration bearer token. Unknown or already used logout tokens are
/// accepted silently.
async fn saml_logout_callback(
    State(state): State<FamilyState>,
    headers: HeaderMap,
    Json(profile): Json<FederatedProfile>,
) -> Result<StatusCode, ApiError> {
    if !bearer_matches(&headers, state.integration_token.as_deref()) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.not_found",
            family = state.auth.store().family().key_prefix(),
            "Invalid single logout credentials"
        );
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    state.auth.logout_by_token(&profile).await?;
    Ok(StatusCode::NO_CONTENT)
}
