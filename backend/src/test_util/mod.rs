//! Fakes shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use homestay_common::{Principal, Role, RoleRecord};
use tokio::sync::{Barrier, Mutex, Notify};

use crate::config::{
    AuthConfig, Config, CorsConfig, GuardConfig, IdentityConfig, LoggingConfig, RolesConfig, ServerConfig,
    SessionConfig,
};
use crate::identity::{IdentityProvider, IdpCredential, ProviderError, ProviderSession};
use crate::roles::{NewRoleRecord, RoleStore, SqliteRoleStore, StoreError};
use crate::AppState;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        cors: CorsConfig {
            origins: "*".to_string(),
        },
        identity: IdentityConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:9/v1".to_string(),
            token_url: "http://127.0.0.1:9/v1".to_string(),
            request_uri: "http://localhost".to_string(),
            jwt_issuer: None,
            jwt_audience: None,
        },
        roles: RolesConfig::default(),
        session: SessionConfig::default(),
        auth: AuthConfig::default(),
        guard: GuardConfig::default(),
    }
}

/// Application state over an in-memory role store and the given provider.
pub fn create_test_state(provider: FakeIdentityProvider) -> Result<(Arc<AppState>, Arc<SqliteRoleStore>), StoreError> {
    let store = Arc::new(SqliteRoleStore::in_memory()?);
    let state = AppState::new(test_config(), Arc::new(provider), store.clone(), None);
    Ok((Arc::new(state), store))
}

struct FakeAccount {
    password: String,
    principal: Principal,
}

/// In-process identity provider.
///
/// Password accounts are registered up front or through `create_account`.
/// Federated sign-ins use the credential's ID token as the principal id.
/// Tokens are derived from the principal id (`id-<uid>`, `refresh-<uid>`).
#[derive(Default)]
pub struct FakeIdentityProvider {
    accounts: Mutex<HashMap<String, FakeAccount>>,
    next_uid: AtomicUsize,
    refresh_revoked: AtomicBool,
    fail_sign_out: bool,
    sign_outs: AtomicUsize,
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, email: &str, password: &str, uid: &str) -> Self {
        self.accounts.get_mut().insert(
            email.to_lowercase(),
            FakeAccount {
                password: password.to_string(),
                principal: Principal::new(uid, Some(email)),
            },
        );
        self
    }

    /// Make `sign_out` fail.
    pub fn failing_sign_out(mut self) -> Self {
        self.fail_sign_out = true;
        self
    }

    /// Make every later refresh fail as expired.
    pub async fn revoke_refresh_tokens(&self) {
        self.refresh_revoked.store(true, Ordering::SeqCst);
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn session_for(principal: Principal) -> ProviderSession {
        ProviderSession {
            id_token: format!("id-{}", principal.uid),
            refresh_token: format!("refresh-{}", principal.uid),
            expires_at: Utc::now() + Duration::hours(1),
            principal,
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<ProviderSession, ProviderError> {
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(&email.to_lowercase())
            .ok_or(ProviderError::UnknownAccount)?;
        if account.password != password {
            return Err(ProviderError::WrongPassword);
        }
        Ok(Self::session_for(account.principal.clone()))
    }

    async fn sign_in_with_idp(&self, credential: &IdpCredential) -> Result<ProviderSession, ProviderError> {
        let token = credential
            .id_token
            .as_deref()
            .ok_or_else(|| ProviderError::Unknown("MISSING_ID_TOKEN".to_string()))?;
        let mut principal = Principal::new(token, Some(format!("{}@{}", token, credential.provider_id).as_str()));
        principal.display_name = Some(format!("{} user", credential.provider_id));
        Ok(Self::session_for(principal))
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderSession, ProviderError> {
        if !email.contains('@') {
            return Err(ProviderError::InvalidEmail);
        }
        if password.len() < 6 {
            return Err(ProviderError::WeakPassword);
        }

        let mut accounts = self.accounts.lock().await;
        let key = email.to_lowercase();
        if accounts.contains_key(&key) {
            return Err(ProviderError::EmailInUse);
        }

        let uid = format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst) + 1);
        let mut principal = Principal::new(uid, Some(email));
        principal.display_name = display_name.map(String::from);
        accounts.insert(
            key,
            FakeAccount {
                password: password.to_string(),
                principal: principal.clone(),
            },
        );
        Ok(Self::session_for(principal))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        if self.refresh_revoked.load(Ordering::SeqCst) {
            return Err(ProviderError::SessionExpired);
        }
        let uid = refresh_token
            .strip_prefix("refresh-")
            .ok_or(ProviderError::SessionExpired)?;

        let accounts = self.accounts.lock().await;
        let principal = accounts
            .values()
            .map(|a| &a.principal)
            .find(|p| p.uid == uid)
            .cloned()
            .unwrap_or_else(|| Principal::new(uid, None));
        Ok(Self::session_for(principal))
    }

    async fn sign_out(&self, _session: &ProviderSession) -> Result<(), ProviderError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out {
            return Err(ProviderError::RequestFailed("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Role store whose every call fails.
pub struct FailingRoleStore;

fn unreachable_store() -> StoreError {
    StoreError::DatabaseError("connection refused".to_string())
}

#[async_trait]
impl RoleStore for FailingRoleStore {
    async fn find_by_principal(&self, _principal_id: &str) -> Result<Option<RoleRecord>, StoreError> {
        Err(unreachable_store())
    }

    async fn insert(&self, _record: NewRoleRecord) -> Result<RoleRecord, StoreError> {
        Err(unreachable_store())
    }

    async fn record_login(&self, _principal_id: &str, _at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(unreachable_store())
    }

    async fn set_online(&self, _principal_id: &str, _online: bool) -> Result<(), StoreError> {
        Err(unreachable_store())
    }

    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError> {
        Err(unreachable_store())
    }

    async fn update_role(&self, _id: &str, _role: Role) -> Result<RoleRecord, StoreError> {
        Err(unreachable_store())
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Err(unreachable_store())
    }
}

/// Wraps a store so the first `parties` lookups all complete before any of
/// them returns, forcing concurrent first sign-ins to race on insert.
pub struct RacingRoleStore {
    inner: Arc<dyn RoleStore>,
    barrier: Barrier,
    remaining: AtomicUsize,
}

impl RacingRoleStore {
    pub fn new(inner: Arc<dyn RoleStore>, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            remaining: AtomicUsize::new(parties),
        }
    }
}

/// Wraps a store so the first lookup blocks until [`GatedRoleStore::release`].
pub struct GatedRoleStore {
    inner: Arc<dyn RoleStore>,
    armed: AtomicBool,
    entered: Notify,
    gate: Notify,
}

impl GatedRoleStore {
    pub fn new(inner: Arc<dyn RoleStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Wait until the gated lookup has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl RoleStore for RacingRoleStore {
    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<RoleRecord>, StoreError> {
        let found = self.inner.find_by_principal(principal_id).await;
        let gated = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if gated {
            self.barrier.wait().await;
        }
        found
    }

    async fn insert(&self, record: NewRoleRecord) -> Result<RoleRecord, StoreError> {
        self.inner.insert(record).await
    }

    async fn record_login(&self, principal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_login(principal_id, at).await
    }

    async fn set_online(&self, principal_id: &str, online: bool) -> Result<(), StoreError> {
        self.inner.set_online(principal_id, online).await
    }

    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError> {
        self.inner.list().await
    }

    async fn update_role(&self, id: &str, role: Role) -> Result<RoleRecord, StoreError> {
        self.inner.update_role(id, role).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

#[async_trait]
impl RoleStore for GatedRoleStore {
    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<RoleRecord>, StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        self.inner.find_by_principal(principal_id).await
    }

    async fn insert(&self, record: NewRoleRecord) -> Result<RoleRecord, StoreError> {
        self.inner.insert(record).await
    }

    async fn record_login(&self, principal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_login(principal_id, at).await
    }

    async fn set_online(&self, principal_id: &str, online: bool) -> Result<(), StoreError> {
        self.inner.set_online(principal_id, online).await
    }

    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError> {
        self.inner.list().await
    }

    async fn update_role(&self, id: &str, role: Role) -> Result<RoleRecord, StoreError> {
        self.inner.update_role(id, role).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}
