//! Principals, role records and the composed application user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Role;

/// Identity-provider user. Read-only on our side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Provider user id.
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl Principal {
    pub fn new(uid: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            uid: uid.into(),
            email: email.map(String::from),
            display_name: None,
            photo_url: None,
        }
    }
}

/// Datastore row binding a principal to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Row id.
    pub id: String,
    /// Provider user id (unique).
    pub principal_id: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Signed-in user as seen by views: principal fields plus the resolved role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUser {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub role: Role,
    /// Whether the session was asked to outlive the browser session.
    #[serde(default)]
    pub remember_session: bool,
}

impl AppUser {
    pub fn compose(principal: &Principal, role: Role, remember_session: bool) -> Self {
        Self {
            uid: principal.uid.clone(),
            email: principal.email.clone().unwrap_or_default(),
            display_name: principal.display_name.clone(),
            photo_url: principal.photo_url.clone(),
            role,
            remember_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_copies_principal_fields() {
        let principal = Principal {
            uid: "u1".to_string(),
            email: Some("guest@example.com".to_string()),
            display_name: Some("Kim Angela".to_string()),
            photo_url: Some("https://cdn.example.com/a.png".to_string()),
        };

        let user = AppUser::compose(&principal, Role::Staff, true);
        assert_eq!(user.uid, "u1");
        assert_eq!(user.email, "guest@example.com");
        assert_eq!(user.display_name.as_deref(), Some("Kim Angela"));
        assert_eq!(user.photo_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(user.role, Role::Staff);
        assert!(user.remember_session);
    }

    #[test]
    fn test_compose_without_email_uses_empty_string() {
        let user = AppUser::compose(&Principal::new("u2", None), Role::Tourist, false);
        assert_eq!(user.email, "");
    }

    #[test]
    fn test_role_record_deserialize_optional_fields() {
        let json = r#"{
            "id": "r1",
            "principal_id": "u1",
            "email": "guest@example.com",
            "role": "tourist",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;

        let record: RoleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.role, Role::Tourist);
        assert!(record.display_name.is_none());
        assert!(record.last_login.is_none());
    }
}
