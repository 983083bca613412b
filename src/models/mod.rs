//! Data models
//!
//! Session state held by the gateway: the session record, the identity it
//! carries and the logout token used for single logout.

mod session;

pub use session::{
    FederatedProfile, LogoutToken, Session, SessionFamily, SessionId, SessionUser, UserType,
};
