//! JSON bodies exchanged between the booking site and the auth gateway.
//!
//! # Endpoints
//!
//! - `POST /api/auth/login` takes [`LoginRequest`], returns [`AuthResponse`]
//! - `POST /api/auth/register` takes [`RegisterRequest`], returns [`AuthResponse`]
//! - `POST /api/auth/provider` takes [`PopupOutcome`], returns [`AuthResponse`]
//! - `GET /api/session` returns [`SessionSnapshot`]
//! - `GET /api/guard?path=..` returns [`GuardResponse`]
//! - `GET /admin/api/users` returns [`UsersResponse`]
//! - `PATCH /admin/api/users/:id/role` takes [`UpdateRoleRequest`]
//!
//! Failures are reported as [`ErrorBody`].

use serde::{Deserialize, Serialize};

use crate::{AppUser, Role, RoleRecord};

/// Email/password sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Keep the session past the browser session ("remember me").
    #[serde(default)]
    pub remember_session: bool,
}

/// Account creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl RegisterRequest {
    /// Display name built from the profile fields, if any were given.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Result of the third-party sign-in popup, as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PopupOutcome {
    /// The popup returned a federated credential.
    Completed {
        /// Federated provider, e.g. "google.com".
        provider_id: String,
        #[serde(default)]
        id_token: Option<String>,
        #[serde(default)]
        access_token: Option<String>,
    },
    /// The user closed the popup.
    Dismissed,
    /// The browser refused to open the popup.
    Blocked,
}

/// Successful sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: AppUser,
    /// Where the site should navigate next.
    pub redirect_to: String,
}

/// Current session state for views: `resolved` is false while the first
/// reconciliation is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub resolved: bool,
    pub user: Option<AppUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Render the requested page.
    Render,
    /// Show a neutral loading state and ask again.
    Loading,
    /// Navigate to `location` instead.
    Redirect,
}

/// Route guard decision for one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardResponse {
    pub outcome: GuardOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Admin role change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<RoleRecord>,
    pub total: usize,
}

/// Error envelope: `{"error": {"type": .., "message": ..}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_remember_defaults_to_false() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.c","password":"secret"}"#).unwrap();
        assert!(!req.remember_session);
    }

    #[test]
    fn test_popup_outcome_tagged() {
        let json = r#"{"outcome":"completed","provider_id":"google.com","id_token":"tok"}"#;
        let outcome: PopupOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(
            outcome,
            PopupOutcome::Completed {
                provider_id: "google.com".to_string(),
                id_token: Some("tok".to_string()),
                access_token: None,
            }
        );

        let dismissed: PopupOutcome = serde_json::from_str(r#"{"outcome":"dismissed"}"#).unwrap();
        assert_eq!(dismissed, PopupOutcome::Dismissed);
    }

    #[test]
    fn test_register_display_name() {
        let mut req = RegisterRequest {
            email: "a@b.c".to_string(),
            password: "secret".to_string(),
            first_name: Some("Kim".to_string()),
            last_name: Some(" Angela ".to_string()),
        };
        assert_eq!(req.display_name().as_deref(), Some("Kim Angela"));

        req.first_name = None;
        req.last_name = Some("  ".to_string());
        assert!(req.display_name().is_none());
    }

    #[test]
    fn test_guard_response_omits_missing_location() {
        let json = serde_json::to_string(&GuardResponse {
            outcome: GuardOutcome::Loading,
            location: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"loading"}"#);
    }

    #[test]
    fn test_error_body_uses_type_key() {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: "invalid_credentials".to_string(),
                message: "Invalid email or password.".to_string(),
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""type":"invalid_credentials""#));
    }
}
