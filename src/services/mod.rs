//! Services layer - Business logic
//!
//! Session and identity handling independent of HTTP:
//! - Translating session users into the trusted backend identity
//! - Persisting sessions and logout tokens
//! - Login and logout state transitions

pub mod auth;
pub mod identity;
pub mod session;

pub use auth::{AuthError, AuthService, AUDIT_TARGET};
pub use identity::{integration_identity, serialize_identity, IdentityError, USER_HEADER};
pub use session::SessionStore;
