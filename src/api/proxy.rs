//! Backend proxy
//!
//! Forwards requests to the backend services. Caller identity reaches the
//! backend only through the `x-user` header computed here from the
//! session; whatever identity the client itself asserts is dropped.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::api::middleware::{ApiError, CurrentSession, FamilyState};
use crate::models::SessionUser;
use crate::services::{integration_identity, serialize_identity, IdentityError, AUDIT_TARGET, USER_HEADER};

/// Largest request body forwarded to the backend
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Client headers that could carry an asserted identity
const IDENTITY_HEADERS: &[&str] = &["authorization", USER_HEADER];

fn normalize_header_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Header names listed in `Connection`, which are hop-by-hop as well
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| normalize_header_name(name.trim()))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Copy headers except the ones `skip` rejects. Names are compared lower-cased.
fn filter_headers(original: &HeaderMap, skip: impl Fn(&str) -> bool) -> HeaderMap {
    let listed = connection_listed(original);
    let mut headers = HeaderMap::with_capacity(original.len());

    for (name, value) in original {
        let name = normalize_header_name(name.as_str());
        if skip(&name)
            || HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || listed.contains(&name)
            || name == "content-length"
        {
            continue;
        }
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.append(name, value.clone());
        }
    }

    headers
}

/// Build the header set of an outgoing backend request.
///
/// Drops `authorization`, `x-user`, `host` and connection-level headers of
/// the original request regardless of casing, then sets `x-user` from the
/// session user. Anonymous requests carry no `x-user`.
///
/// # Errors
///
/// Fails if the session user cannot be serialized. The request must then
/// not be forwarded at all.
pub fn decorate_proxy_request(
    original: &HeaderMap,
    user: Option<&SessionUser>,
) -> Result<HeaderMap, IdentityError> {
    let mut headers = filter_headers(original, |name| {
        name == "host" || IDENTITY_HEADERS.contains(&name)
    });

    if let Some(user) = user {
        let identity = serialize_identity(user)?;
        let value = HeaderValue::from_bytes(identity.as_bytes())
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        headers.insert(USER_HEADER, value);
    }

    Ok(headers)
}

/// A backend service reachable under a path prefix
#[derive(Debug, Clone)]
pub struct Backend {
    client: reqwest::Client,
    base_url: String,
}

impl Backend {
    pub fn new(client: reqwest::Client, service_url: &str, prefix: &str) -> Self {
        Self {
            client,
            base_url: format!("{}{}", service_url.trim_end_matches('/'), prefix),
        }
    }

    /// Send the request to the backend with the given headers.
    ///
    /// Method, body and query are passed through; the request path is
    /// appended to the backend prefix.
    pub async fn forward(&self, request: Request, headers: HeaderMap) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| ApiError::payload_too_large("Request body too large"))?;

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Backend request to {} failed: {}", url, e);
                ApiError::bad_gateway("Backend service unavailable")
            })?;

        let status = upstream.status();
        let headers = filter_headers(upstream.headers(), |_| false);
        let bytes = upstream.bytes().await.map_err(|e| {
            tracing::error!("Reading backend response from {} failed: {}", url, e);
            ApiError::bad_gateway("Backend service unavailable")
        })?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// ANY /api/{citizen,internal}/* - Forward to the family's backend
///
/// The `x-user` header is set when the session is authenticated.
pub async fn proxy_request(
    State(state): State<FamilyState>,
    current: CurrentSession,
    request: Request,
) -> Result<Response, ApiError> {
    let headers = decorate_proxy_request(request.headers(), current.user()).map_err(|e| {
        tracing::error!("Refusing to forward request: {}", e);
        ApiError::internal_error("Internal server error")
    })?;

    state.backend.forward(request, headers).await
}

/// State of the integration router
#[derive(Clone)]
pub struct IntegrationState {
    pub token: Option<String>,
    pub backend: Backend,
}

/// Whether the request carries `Authorization: Bearer <expected>`.
/// Always false when no token is configured.
pub fn bearer_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|token| !token.is_empty()) else {
        return false;
    };

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}

/// ANY /api/integration/* - Forward machine-to-machine calls
///
/// Authenticated with the shared integration token instead of a session.
pub async fn proxy_integration_request(
    State(state): State<IntegrationState>,
    request: Request,
) -> Result<Response, ApiError> {
    if !bearer_matches(request.headers(), state.token.as_deref()) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_code = "evaka.apigw.auth.not_found",
            path = %request.uri().path(),
            "Invalid integration credentials"
        );
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    let mut headers = decorate_proxy_request(request.headers(), None).map_err(|e| {
        tracing::error!("Refusing to forward request: {}", e);
        ApiError::internal_error("Internal server error")
    })?;
    let identity = HeaderValue::from_str(&integration_identity()).map_err(|e| {
        tracing::error!("Invalid integration identity: {}", e);
        ApiError::internal_error("Internal server error")
    })?;
    headers.insert(USER_HEADER, identity);

    state.backend.forward(request, headers).await
}
