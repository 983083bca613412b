//! API layer - HTTP handlers and routing
//!
//! Routes served by the gateway:
//! - `/api/citizen/*` - citizen session family, backend prefix `/citizen`
//! - `/api/internal/*` - employee session family, backend prefix `/employee`
//! - `/api/integration/*` - machine-to-machine calls, backend prefix `/integration`
//! - `/health` - liveness

pub mod auth;
pub mod middleware;
pub mod proxy;

use axum::{
    middleware as axum_middleware,
    routing::{any, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::models::SessionFamily;
use proxy::{Backend, IntegrationState};

pub use middleware::{ApiError, AppState, AuthenticatedUser, CurrentSession, FamilyState};

/// Build the router of one session family
///
/// `/auth/*` and `/public/*` are open to anonymous sessions. Everything else
/// is proxied only for authenticated sessions. `/auth/logout` sits outside
/// the session loading layer so a failing store read still clears the cookie.
pub fn build_family_router(state: FamilyState) -> Router {
    let protected = any(proxy::proxy_request).layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::require_authentication,
    ));

    Router::new()
        .nest("/auth", auth::router())
        .route("/public/{*path}", any(proxy::proxy_request))
        .route("/{*path}", protected)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::load_session,
        ))
        .route("/auth/logout", post(auth::logout))
        .with_state(state)
}

/// Build the integration router
pub fn build_integration_router(state: &AppState) -> Router {
    let integration = IntegrationState {
        token: state.config.integration.token.clone(),
        backend: Backend::new(state.http_client.clone(), &state.config.service.url, "/integration"),
    };

    Router::new()
        .route("/{*path}", any(proxy::proxy_integration_request))
        .with_state(integration)
}

/// Build the main router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/citizen", build_family_router(state.family(SessionFamily::Citizen)))
        .nest("/api/internal", build_family_router(state.family(SessionFamily::Employee)))
        .nest("/api/integration", build_integration_router(&state))
        .layer(TraceLayer::new_for_http())
}

/// GET /health - Liveness check
async fn health() -> &'static str {
    "OK"
}
