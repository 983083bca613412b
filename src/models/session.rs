//! Session model
//!
//! A session is the server-side record behind the session cookie. It carries
//! the authenticated identity, if any, and the logout token handed out by the
//! identity provider at login.

use chrono::{DateTime, Utc};
use data_encoding::BASE64URL_NOPAD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes in a session id
const SESSION_ID_BYTES: usize = 32;

/// Separator between the NameID and SessionIndex parts of a logout token
const LOGOUT_TOKEN_SEPARATOR: &str = ":::";

/// Opaque session identifier carried in the session cookie
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id from the operating system's CSPRNG
    pub fn generate() -> anyhow::Result<Self> {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        getrandom::fill(&mut bytes)
            .map_err(|e| anyhow::anyhow!("Failed to generate session id: {}", e))?;
        Ok(Self(BASE64URL_NOPAD.encode(&bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SessionId {
    // Only a prefix, so ids do not end up in logs in usable form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionId({}..)", prefix)
    }
}

/// Kind of principal a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    /// Citizen authenticated with a weak (username/password) login
    CitizenWeak,
    /// Citizen authenticated with strong electronic identification
    CitizenStrong,
    /// Municipal employee
    Employee,
    /// Paired mobile device
    Mobile,
    /// Internal system principal
    System,
}

impl UserType {
    /// Whether this user type may hold a citizen session
    pub fn is_citizen(self) -> bool {
        matches!(self, UserType::CitizenWeak | UserType::CitizenStrong)
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserType::CitizenWeak => write!(f, "CITIZEN_WEAK"),
            UserType::CitizenStrong => write!(f, "CITIZEN_STRONG"),
            UserType::Employee => write!(f, "EMPLOYEE"),
            UserType::Mobile => write!(f, "MOBILE"),
            UserType::System => write!(f, "SYSTEM"),
        }
    }
}

/// The two independent session populations served by the gateway.
/// Each has its own cookie and its own key namespace in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFamily {
    Citizen,
    Employee,
}

impl SessionFamily {
    /// Whether a user of the given type may hold a session of this family
    pub fn allows(self, user_type: UserType) -> bool {
        match self {
            SessionFamily::Citizen => user_type.is_citizen(),
            SessionFamily::Employee => !user_type.is_citizen(),
        }
    }

    /// Prefix of every store key belonging to this family
    pub fn key_prefix(self) -> &'static str {
        match self {
            SessionFamily::Citizen => "citizen",
            SessionFamily::Employee => "employee",
        }
    }
}

/// Identity stored on an authenticated session.
///
/// Every field is optional on the wire because sessions written by older
/// gateway versions may lack them. New sessions always have `id` and
/// `user_type` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_scoped_roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_employee_id: Option<String>,
}

impl SessionUser {
    pub fn citizen_weak(id: impl Into<String>) -> Self {
        Self::with_type(id, UserType::CitizenWeak)
    }

    pub fn citizen(id: impl Into<String>) -> Self {
        Self::with_type(id, UserType::CitizenStrong)
    }

    pub fn employee(
        id: impl Into<String>,
        global_roles: Vec<String>,
        all_scoped_roles: Vec<String>,
    ) -> Self {
        Self {
            global_roles: Some(global_roles),
            all_scoped_roles: Some(all_scoped_roles),
            ..Self::with_type(id, UserType::Employee)
        }
    }

    pub fn mobile(id: impl Into<String>, employee_id: Option<String>) -> Self {
        Self {
            mobile_employee_id: employee_id,
            ..Self::with_type(id, UserType::Mobile)
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self::with_type(id, UserType::System)
    }

    fn with_type(id: impl Into<String>, user_type: UserType) -> Self {
        Self {
            id: Some(id.into()),
            user_type: Some(user_type),
            ..Self::default()
        }
    }

    /// The id, if present and non-empty
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// NameID and SessionIndex of a federated (SAML) login, as handed over by
/// the identity provider integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedProfile {
    pub name_id: String,
    pub session_index: String,
}

impl FederatedProfile {
    /// The logout token value for this profile: `nameID:::sessionIndex`
    pub fn logout_token_value(&self) -> String {
        format!("{}{}{}", self.name_id, LOGOUT_TOKEN_SEPARATOR, self.session_index)
    }

    pub fn logout_token(&self) -> LogoutToken {
        LogoutToken {
            value: self.logout_token_value(),
        }
    }
}

/// Single-use token letting the identity provider end this session.
/// Its store mapping lives exactly as long as the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutToken {
    pub value: String,
}

/// Session entity stored in the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID (cookie value)
    pub id: SessionId,
    /// Authenticated identity, absent for anonymous sessions
    #[serde(default)]
    pub user: Option<SessionUser>,
    #[serde(default)]
    pub logout_token: Option<LogoutToken>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create an anonymous session with a fresh id
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            id: SessionId::generate()?,
            user: None,
            logout_token: None,
            created_at: Utc::now(),
        })
    }

    /// The session user, provided it carries an id
    pub fn authenticated_user(&self) -> Option<&SessionUser> {
        self.user.as_ref().filter(|user| user.id().is_some())
    }
}
