//! Identity translation
//!
//! Maps a session user to the `x-user` header value the backend services
//! trust as the caller identity. Only what the backend needs for
//! authorization is included.

use serde::Serialize;

use crate::models::{SessionUser, UserType};

/// Name of the trusted identity header sent to backend services
pub const USER_HEADER: &str = "x-user";

/// Error raised when a session user cannot be expressed as an identity.
///
/// This indicates a broken session record, not a client error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Session user has no user type")]
    MissingUserType,
    #[error("Failed to serialize identity: {0}")]
    Serialization(String),
}

/// Wire shape of the identity header
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum UserHeader<'a> {
    CitizenWeak {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a str>,
    },
    Citizen {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a str>,
    },
    Employee {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a str>,
        global_roles: &'a [String],
        all_scoped_roles: &'a [String],
    },
    Mobile {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        employee_id: Option<&'a str>,
    },
    System,
    Integration,
}

impl UserHeader<'_> {
    fn to_json(&self) -> Result<String, IdentityError> {
        serde_json::to_string(self).map_err(|e| IdentityError::Serialization(e.to_string()))
    }
}

/// Serialize a session user into the `x-user` header value.
///
/// | user type        | header                                                  |
/// |------------------|---------------------------------------------------------|
/// | `CITIZEN_WEAK`   | `{"type":"citizen_weak","id":..}`                       |
/// | `CITIZEN_STRONG` | `{"type":"citizen","id":..}`                            |
/// | `EMPLOYEE`       | `{"type":"employee","id":..,"globalRoles":[..],"allScopedRoles":[..]}` |
/// | `MOBILE`         | `{"type":"mobile","id":..,"employeeId":..}`             |
/// | `SYSTEM`         | `{"type":"system"}`                                     |
///
/// # Errors
///
/// `IdentityError::MissingUserType` when the user has no type. Callers must
/// fail the request rather than forward it without an identity.
pub fn serialize_identity(user: &SessionUser) -> Result<String, IdentityError> {
    let user_type = user.user_type.ok_or(IdentityError::MissingUserType)?;
    let id = user.id.as_deref();

    let header = match user_type {
        UserType::CitizenWeak => UserHeader::CitizenWeak { id },
        UserType::CitizenStrong => UserHeader::Citizen { id },
        UserType::Employee => UserHeader::Employee {
            id,
            global_roles: user.global_roles.as_deref().unwrap_or_default(),
            all_scoped_roles: user.all_scoped_roles.as_deref().unwrap_or_default(),
        },
        UserType::Mobile => UserHeader::Mobile {
            id,
            employee_id: user.mobile_employee_id.as_deref(),
        },
        // The system principal has no subject
        UserType::System => UserHeader::System,
    };

    header.to_json()
}

/// Header value used on integration routes, which have no session
pub fn integration_identity() -> String {
    // Serializing a unit variant cannot fail
    UserHeader::Integration
        .to_json()
        .unwrap_or_else(|_| r#"{"type":"integration"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citizen_weak() {
        let user = SessionUser::citizen_weak("c1");
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"citizen_weak","id":"c1"}"#
        );
    }

    #[test]
    fn test_citizen_strong() {
        let user = SessionUser::citizen("c2");
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"citizen","id":"c2"}"#
        );
    }

    #[test]
    fn test_employee() {
        let user = SessionUser::employee("e1", vec!["ADMIN".to_string()], vec![]);
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"employee","id":"e1","globalRoles":["ADMIN"],"allScopedRoles":[]}"#
        );
    }

    #[test]
    fn test_employee_without_roles_gets_empty_lists() {
        let user = SessionUser {
            id: Some("e2".to_string()),
            user_type: Some(UserType::Employee),
            roles: Some(vec!["LEGACY".to_string()]),
            ..SessionUser::default()
        };
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"employee","id":"e2","globalRoles":[],"allScopedRoles":[]}"#
        );
    }

    #[test]
    fn test_mobile() {
        let user = SessionUser::mobile("m1", Some("e9".to_string()));
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"mobile","id":"m1","employeeId":"e9"}"#
        );
    }

    #[test]
    fn test_mobile_without_employee() {
        let user = SessionUser::mobile("m1", None);
        assert_eq!(
            serialize_identity(&user).unwrap(),
            r#"{"type":"mobile","id":"m1"}"#
        );
    }

    #[test]
    fn test_system_has_no_id() {
        let user = SessionUser::system("should-not-leak");
        assert_eq!(serialize_identity(&user).unwrap(), r#"{"type":"system"}"#);
    }

    #[test]
    fn test_missing_user_type_fails() {
        let user = SessionUser {
            id: Some("x".to_string()),
            ..SessionUser::default()
        };
        assert_eq!(serialize_identity(&user), Err(IdentityError::MissingUserType));
    }

    #[test]
    fn test_integration_identity() {
        assert_eq!(integration_identity(), r#"{"type":"integration"}"#);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn user_type_strategy() -> impl Strategy<Value = UserType> {
            prop_oneof![
                Just(UserType::CitizenWeak),
                Just(UserType::CitizenStrong),
                Just(UserType::Employee),
                Just(UserType::Mobile),
                Just(UserType::System),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(50))]

            /// Every user type serializes to a JSON object whose `type` is fixed by the user type
            /// and which never carries roles or ids the backend does not expect.
            #[test]
            fn property_identity_shape_follows_user_type(
                user_type in user_type_strategy(),
                id in "[a-f0-9-]{1,36}",
                roles in prop::collection::vec("[A-Z_]{1,12}", 0..4),
            ) {
                let user = SessionUser {
                    id: Some(id.clone()),
                    user_type: Some(user_type),
                    roles: Some(roles.clone()),
                    global_roles: Some(roles.clone()),
                    all_scoped_roles: Some(roles.clone()),
                    mobile_employee_id: Some("emp".to_string()),
                };

                let json: serde_json::Value =
                    serde_json::from_str(&serialize_identity(&user).unwrap()).unwrap();
                let object = json.as_object().unwrap();

                let expected_type = match user_type {
                    UserType::CitizenWeak => "citizen_weak",
                    UserType::CitizenStrong => "citizen",
                    UserType::Employee => "employee",
                    UserType::Mobile => "mobile",
                    UserType::System => "system",
                };
                prop_assert_eq!(object["type"].as_str(), Some(expected_type));
                prop_assert!(!object.contains_key("roles"));
                prop_assert_eq!(object.contains_key("globalRoles"), user_type == UserType::Employee);
                prop_assert_eq!(object.contains_key("employeeId"), user_type == UserType::Mobile);
                if user_type == UserType::System {
                    prop_assert!(!object.contains_key("id"));
                } else {
                    prop_assert_eq!(object["id"].as_str(), Some(id.as_str()));
                }
            }
        }
    }
}
