use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use homestay_common::Principal;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),
}

/// Minimum time between key reloads triggered by an unknown `kid`.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// JWKS key set response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

/// ID token claims.
#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    exp: u64,
    iat: u64,
}

#[derive(Debug, Deserialize)]
struct OidcConfig {
    jwks_uri: String,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::MissingHeader)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    auth_header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or(TokenError::InvalidFormat)
}

/// Verifies provider ID tokens against the issuer's published signing keys.
pub struct IdTokenVerifier {
    http_client: Client,
    jwks_uri: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: Mutex<Instant>,
    min_refresh_interval: Duration,
    issuer: String,
    audience: Option<String>,
}

impl IdTokenVerifier {
    pub async fn new(issuer: &str, audience: Option<&str>) -> Result<Self, TokenError> {
        let http_client = Client::new();

        // Fetch OIDC configuration to get JWKS URI
        let config_url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
        let config: OidcConfig = http_client
            .get(&config_url)
            .send()
            .await
            .map_err(|e| TokenError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenError::JwksFetchError(e.to_string()))?;

        let verifier = Self {
            http_client,
            jwks_uri: config.jwks_uri,
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(Instant::now()),
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            issuer: issuer.to_string(),
            audience: audience.map(String::from),
        };

        verifier.refresh_keys().await?;

        Ok(verifier)
    }

    /// Reload the key set for an unknown `kid`, at most once per
    /// `min_refresh_interval`.
    async fn refresh_for_unknown_kid(&self, kid: &str) -> Result<(), TokenError> {
        {
            let mut last_refresh = self.last_refresh.lock().await;
            if last_refresh.elapsed() < self.min_refresh_interval {
                tracing::debug!(kid = %kid, "Unknown signing key, JWKS reloaded recently");
                return Ok(());
            }
            *last_refresh = Instant::now();
        }
        self.refresh_keys().await
    }

    async fn refresh_keys(&self) -> Result<(), TokenError> {
        tracing::info!("Fetching JWKS from {}", self.jwks_uri);

        let response: JwksResponse = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| TokenError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenError::JwksFetchError(e.to_string()))?;

        let mut keys = self.keys.write().await;
        keys.clear();

        for jwk in response.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                match DecodingKey::from_rsa_components(n, e) {
                    Ok(key) => {
                        keys.insert(jwk.kid.clone(), key);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse RSA key {}: {}", jwk.kid, e);
                    }
                }
            }
        }

        tracing::info!("Loaded {} JWKS keys", keys.len());
        Ok(())
    }

    /// Authenticate a request by validating its Bearer ID token.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, TokenError> {
        let token = bearer_token(headers)?;
        self.verify(token).await
    }

    /// Validate an ID token and return the principal it names.
    pub async fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::InvalidToken(e.to_string()))?;

        let kid = header
            .kid
            .ok_or_else(|| TokenError::InvalidToken("Missing kid in token header".to_string()))?;

        // Signing keys rotate; an unknown kid may trigger a reload before failing.
        if !self.keys.read().await.contains_key(&kid) {
            self.refresh_for_unknown_kid(&kid).await?;
        }

        let keys = self.keys.read().await;
        let key = keys.get(&kid).ok_or_else(|| TokenError::KeyNotFound(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let token_data =
            decode::<Claims>(token, key, &validation).map_err(|e| TokenError::InvalidToken(e.to_string()))?;

        Ok(Principal {
            uid: token_data.claims.sub,
            email: token_data.claims.email,
            display_name: token_data.claims.name,
            photo_url: token_data.claims.picture,
        })
    }
}
