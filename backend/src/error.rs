//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use homestay_common::{ErrorBody, ErrorDetail};

use crate::identity::ProviderError;
use crate::roles::StoreError;
use crate::session::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sign in required")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        ApiError::Auth(AuthError::Provider(e))
    }
}

fn provider_status(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::InvalidCredentials
        | ProviderError::UnknownAccount
        | ProviderError::WrongPassword
        | ProviderError::SessionExpired => StatusCode::UNAUTHORIZED,
        ProviderError::UserDisabled => StatusCode::FORBIDDEN,
        ProviderError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::EmailInUse | ProviderError::AccountExistsWithDifferentCredential => StatusCode::CONFLICT,
        ProviderError::WeakPassword
        | ProviderError::InvalidEmail
        | ProviderError::PopupDismissed
        | ProviderError::PopupBlocked => StatusCode::BAD_REQUEST,
        ProviderError::RequestFailed(_) | ProviderError::Unknown(_) => StatusCode::BAD_GATEWAY,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Auth(AuthError::Provider(e)) => (provider_status(e), e.kind(), e.user_message().to_string()),
            ApiError::Auth(AuthError::RoleUnavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "role_unavailable",
                "Your account could not be loaded. Please try again later.".to_string(),
            ),
            ApiError::Auth(AuthError::Superseded) => (StatusCode::CONFLICT, "superseded", self.to_string()),
            ApiError::Auth(AuthError::NotSignedIn) | ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "not_signed_in", self.to_string())
            }
            ApiError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            ApiError::Store(StoreError::RequestFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "datastore_unavailable", self.to_string())
            }
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "datastore_error", self.to_string()),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request", self.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();

        match &self {
            ApiError::Auth(AuthError::Provider(e)) if e.is_user_error() => {
                tracing::debug!(kind = kind, "Sign-in rejected by identity provider");
            }
            ApiError::Auth(AuthError::Provider(e)) => {
                tracing::warn!(error = %e, "Identity provider unavailable");
            }
            _ if status.is_server_error() => tracing::error!(error = %self, "Request failed"),
            _ => {}
        }

        let body = Json(ErrorBody {
            error: ErrorDetail {
                kind: kind.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
