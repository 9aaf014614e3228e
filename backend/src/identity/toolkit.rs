use async_trait::async_trait;
use chrono::{Duration, Utc};
use homestay_common::Principal;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{IdentityProvider, IdpCredential, ProviderError, ProviderSession};
use crate::config::IdentityConfig;

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Client for the Identity Toolkit REST API (email/password and federated
/// accounts) and its secure token endpoint.
pub struct IdentityToolkitClient {
    http_client: Client,
    base_url: String,
    token_url: String,
    api_key: String,
    request_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: String,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

/// Response of signInWithPassword, signUp and signInWithIdp.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
    /// Set by signInWithIdp when the email belongs to an account using
    /// another sign-in method.
    #[serde(default)]
    need_confirmation: bool,
}

/// Secure token endpoint response (snake_case, unlike the accounts API).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorPayload,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

/// Map a provider error message such as `WEAK_PASSWORD : Password should be
/// at least 6 characters` onto the error taxonomy.
fn map_error_code(message: &str) -> ProviderError {
    let code = message.split(" : ").next().unwrap_or(message).trim();
    match code {
        "INVALID_LOGIN_CREDENTIALS" => ProviderError::InvalidCredentials,
        "EMAIL_NOT_FOUND" => ProviderError::UnknownAccount,
        "INVALID_PASSWORD" => ProviderError::WrongPassword,
        "USER_DISABLED" => ProviderError::UserDisabled,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => ProviderError::RateLimited,
        "EMAIL_EXISTS" => ProviderError::EmailInUse,
        "WEAK_PASSWORD" => ProviderError::WeakPassword,
        "INVALID_EMAIL" | "MISSING_EMAIL" => ProviderError::InvalidEmail,
        "FEDERATED_USER_ID_ALREADY_LINKED" => ProviderError::AccountExistsWithDifferentCredential,
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" | "USER_NOT_FOUND" => {
            ProviderError::SessionExpired
        }
        other => ProviderError::Unknown(other.to_string()),
    }
}

async fn read_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => map_error_code(&parsed.error.message),
        Err(_) => ProviderError::Unknown(format!("{}: {}", status, body)),
    }
}

fn expires_at(expires_in: Option<&str>) -> chrono::DateTime<Utc> {
    let secs = expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Utc::now() + Duration::seconds(secs)
}

impl SignInResponse {
    fn into_session(self) -> Result<ProviderSession, ProviderError> {
        if self.need_confirmation {
            return Err(ProviderError::AccountExistsWithDifferentCredential);
        }

        let (id_token, refresh_token) = match (self.id_token, self.refresh_token) {
            (Some(id), Some(refresh)) => (id, refresh),
            _ => return Err(ProviderError::Unknown("response carried no tokens".to_string())),
        };

        Ok(ProviderSession {
            principal: Principal {
                uid: self.local_id,
                email: self.email,
                display_name: self.display_name,
                photo_url: self.photo_url,
            },
            id_token,
            refresh_token,
            expires_at: expires_at(self.expires_in.as_deref()),
        })
    }
}

impl IdentityToolkitClient {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            http_client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_uri: config.request_uri.clone(),
        }
    }

    /// POST to an `accounts:<method>` endpoint.
    async fn post_accounts<B, R>(&self, method: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/accounts:{}", self.base_url, method);

        tracing::debug!("Calling identity provider: accounts:{}", method);

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid response: {}", e)))
    }

    /// Fetch the profile behind an ID token.
    async fn lookup(&self, id_token: &str) -> Result<Principal, ProviderError> {
        let response: LookupResponse = self.post_accounts("lookup", &LookupRequest { id_token }).await?;
        let user = response
            .users
            .into_iter()
            .next()
            .ok_or(ProviderError::SessionExpired)?;

        Ok(Principal {
            uid: user.local_id,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkitClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self.post_accounts("signInWithPassword", &body).await?;
        response.into_session()
    }

    async fn sign_in_with_idp(&self, credential: &IdpCredential) -> Result<ProviderSession, ProviderError> {
        let token_param = match (&credential.id_token, &credential.access_token) {
            (Some(token), _) => format!("id_token={}", urlencoding::encode(token)),
            (None, Some(token)) => format!("access_token={}", urlencoding::encode(token)),
            (None, None) => {
                return Err(ProviderError::Unknown("federated credential carried no token".to_string()))
            }
        };

        let body = IdpRequest {
            post_body: format!(
                "{}&providerId={}",
                token_param,
                urlencoding::encode(&credential.provider_id)
            ),
            request_uri: self.request_uri.clone(),
            return_secure_token: true,
            return_idp_credential: true,
        };
        let response: SignInResponse = self.post_accounts("signInWithIdp", &body).await?;
        response.into_session()
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, ProviderError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self.post_accounts("signUp", &body).await?;
        let mut session = response.into_session()?;

        if let Some(name) = display_name {
            let update = UpdateProfileRequest {
                id_token: &session.id_token,
                display_name: name,
                return_secure_token: false,
            };
            // The account exists at this point; a missing display name is cosmetic.
            match self.post_accounts::<_, serde_json::Value>("update", &update).await {
                Ok(_) => session.principal.display_name = Some(name.to_string()),
                Err(e) => tracing::warn!("Failed to set display name for {}: {}", session.principal.uid, e),
            }
        }

        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        let url = format!("{}/token", self.token_url);

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid response: {}", e)))?;

        // The token endpoint does not return the profile.
        let principal = self.lookup(&tokens.id_token).await?;

        Ok(ProviderSession {
            principal,
            expires_at: expires_at(tokens.expires_in.as_deref()),
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
        })
    }
}
