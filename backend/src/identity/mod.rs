//! Identity provider abstraction.
//!
//! Credential verification, account creation and federated sign-in are
//! delegated to an external provider behind the `IdentityProvider` trait.

mod jwks;
mod toolkit;

pub use jwks::{IdTokenVerifier, TokenError};
pub use toolkit::IdentityToolkitClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homestay_common::Principal;

/// How long a signed-in session should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Survives browser restarts ("remember me").
    Local,
    /// Ends with the browser session.
    Session,
}

impl Persistence {
    pub fn from_remember(remember_session: bool) -> Self {
        if remember_session {
            Persistence::Local
        } else {
            Persistence::Session
        }
    }

    pub fn is_remembered(&self) -> bool {
        matches!(self, Persistence::Local)
    }
}

/// Federated credential returned by a third-party sign-in popup.
#[derive(Debug, Clone)]
pub struct IdpCredential {
    /// e.g. "google.com"
    pub provider_id: String,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

/// Tokens and principal returned by a successful provider sign-in.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub principal: Principal,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("No account for this email")]
    UnknownAccount,
    #[error("Wrong password")]
    WrongPassword,
    #[error("Account disabled")]
    UserDisabled,
    #[error("Too many attempts")]
    RateLimited,
    #[error("Email already in use")]
    EmailInUse,
    #[error("Weak password")]
    WeakPassword,
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Account exists with a different credential")]
    AccountExistsWithDifferentCredential,
    #[error("Sign-in popup dismissed")]
    PopupDismissed,
    #[error("Sign-in popup blocked")]
    PopupBlocked,
    #[error("Provider session expired")]
    SessionExpired,
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Machine-readable error type for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::InvalidCredentials => "invalid_credentials",
            ProviderError::UnknownAccount => "unknown_account",
            ProviderError::WrongPassword => "wrong_password",
            ProviderError::UserDisabled => "user_disabled",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::EmailInUse => "email_in_use",
            ProviderError::WeakPassword => "weak_password",
            ProviderError::InvalidEmail => "invalid_email",
            ProviderError::AccountExistsWithDifferentCredential => "account_exists_with_different_credential",
            ProviderError::PopupDismissed => "popup_dismissed",
            ProviderError::PopupBlocked => "popup_blocked",
            ProviderError::SessionExpired => "session_expired",
            ProviderError::RequestFailed(_) => "provider_unavailable",
            ProviderError::Unknown(_) => "provider_error",
        }
    }

    /// Copy shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::InvalidCredentials => "Invalid email or password.",
            ProviderError::UnknownAccount => "No account found with this email.",
            ProviderError::WrongPassword => "Incorrect password.",
            ProviderError::UserDisabled => "This account has been disabled.",
            ProviderError::RateLimited => "Too many failed attempts. Please try again later.",
            ProviderError::EmailInUse => "This email is already registered. Please sign in instead.",
            ProviderError::WeakPassword => "Password is too weak. Please use a stronger password.",
            ProviderError::InvalidEmail => "Invalid email address.",
            ProviderError::AccountExistsWithDifferentCredential => {
                "An account already exists with this email using a different sign-in method."
            }
            ProviderError::PopupDismissed => "Sign-in cancelled. Please try again.",
            ProviderError::PopupBlocked => "Popup was blocked. Please allow popups and try again.",
            ProviderError::SessionExpired => "Your session has expired. Please sign in again.",
            ProviderError::RequestFailed(_) => {
                "The sign-in service is unavailable. Please try again later."
            }
            ProviderError::Unknown(_) => "Unable to sign in. Please try again.",
        }
    }

    /// Whether the caller has to act (fix input, retry later) rather than
    /// the service being at fault.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, ProviderError::RequestFailed(_) | ProviderError::Unknown(_))
    }
}

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify an email/password pair.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Exchange a federated credential for a provider session.
    async fn sign_in_with_idp(&self, credential: &IdpCredential) -> Result<ProviderSession, ProviderError>;

    /// Create an email/password account and sign it in.
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, ProviderError>;

    /// Exchange a refresh token for a fresh provider session.
    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError>;

    /// End the provider session. Stateless token providers have nothing to
    /// revoke, hence the default.
    async fn sign_out(&self, _session: &ProviderSession) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ProviderError; 14] = [
        ProviderError::InvalidCredentials,
        ProviderError::UnknownAccount,
        ProviderError::WrongPassword,
        ProviderError::UserDisabled,
        ProviderError::RateLimited,
        ProviderError::EmailInUse,
        ProviderError::WeakPassword,
        ProviderError::InvalidEmail,
        ProviderError::AccountExistsWithDifferentCredential,
        ProviderError::PopupDismissed,
        ProviderError::PopupBlocked,
        ProviderError::SessionExpired,
        ProviderError::RequestFailed(String::new()),
        ProviderError::Unknown(String::new()),
    ];

    #[test]
    fn test_each_error_has_distinct_message() {
        let messages: HashSet<&str> = ALL.iter().map(|e| e.user_message()).collect();
        assert_eq!(messages.len(), ALL.len());
    }

    #[test]
    fn test_each_error_has_distinct_kind() {
        let kinds: HashSet<&str> = ALL.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), ALL.len());
    }

    #[test]
    fn test_credential_messages() {
        assert_eq!(ProviderError::InvalidCredentials.user_message(), "Invalid email or password.");
        assert_eq!(
            ProviderError::RateLimited.user_message(),
            "Too many failed attempts. Please try again later."
        );
        assert_eq!(
            ProviderError::PopupBlocked.user_message(),
            "Popup was blocked. Please allow popups and try again."
        );
    }

    #[test]
    fn test_user_errors() {
        assert!(ProviderError::WrongPassword.is_user_error());
        assert!(ProviderError::PopupDismissed.is_user_error());
        assert!(!ProviderError::RequestFailed("timeout".into()).is_user_error());
        assert!(!ProviderError::Unknown("INTERNAL".into()).is_user_error());
    }

    #[test]
    fn test_persistence_from_remember() {
        assert_eq!(Persistence::from_remember(true), Persistence::Local);
        assert_eq!(Persistence::from_remember(false), Persistence::Session);
        assert!(Persistence::Local.is_remembered());
        assert!(!Persistence::Session.is_remembered());
    }
}
