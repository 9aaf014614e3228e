use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use homestay_common::{AppUser, PopupOutcome, Principal, SessionSnapshot};
use tokio::sync::RwLock;

use super::{RoleReconciler, SessionCell, SessionState, SessionSubscription};
use crate::config::SessionConfig;
use crate::identity::{IdentityProvider, IdpCredential, Persistence, ProviderError, ProviderSession};
use crate::roles::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Role unavailable: {0}")]
    RoleUnavailable(#[source] StoreError),
    #[error("Superseded by a newer sign-in or sign-out")]
    Superseded,
    #[error("Not signed in")]
    NotSignedIn,
}

/// How long sessions live.
#[derive(Debug, Clone, Copy)]
pub struct SessionLifetimes {
    /// Absolute lifetime of a remembered sign-in.
    pub remembered: Duration,
    /// Idle lifetime of everything else.
    pub idle: Duration,
}

impl SessionLifetimes {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            remembered: Duration::days(config.remember_days),
            idle: Duration::hours(config.session_hours),
        }
    }
}

impl Default for SessionLifetimes {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

struct Inner {
    principal: Option<Principal>,
    provider_session: Option<ProviderSession>,
    persistence: Persistence,
    signed_in_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// One browser session: the provider session, the signed-in principal and
/// the published [`SessionState`].
pub struct AuthSession {
    id: String,
    provider: Arc<dyn IdentityProvider>,
    reconciler: Arc<RoleReconciler>,
    lifetimes: SessionLifetimes,
    cell: SessionCell,
    inner: RwLock<Inner>,
}

impl AuthSession {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        reconciler: Arc<RoleReconciler>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider,
            reconciler,
            lifetimes,
            cell: SessionCell::new(),
            inner: RwLock::new(Inner {
                principal: None,
                provider_session: None,
                // Provider sign-ins that carry no preference are remembered.
                persistence: Persistence::Local,
                signed_in_at: now,
                last_seen: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.cell.current()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.cell.current().snapshot()
    }

    pub fn subscribe(&self) -> SessionSubscription {
        self.cell.subscribe()
    }

    pub async fn persistence(&self) -> Persistence {
        self.inner.read().await.persistence
    }

    pub async fn set_persistence(&self, persistence: Persistence) {
        self.inner.write().await.persistence = persistence;
    }

    /// Mark the session as used now.
    pub async fn touch(&self) {
        self.inner.write().await.last_seen = Utc::now();
    }

    pub async fn expires_at(&self) -> DateTime<Utc> {
        let inner = self.inner.read().await;
        if inner.provider_session.is_some() && inner.persistence.is_remembered() {
            inner.signed_in_at + self.lifetimes.remembered
        } else {
            inner.last_seen + self.lifetimes.idle
        }
    }

    pub async fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().await <= now
    }

    /// Cookie `Max-Age` in seconds for remembered sessions.
    pub async fn cookie_max_age(&self) -> Option<i64> {
        if self.persistence().await.is_remembered() && self.cell.current().user().is_some() {
            Some((self.expires_at().await - Utc::now()).num_seconds().max(0))
        } else {
            None
        }
    }

    /// Reconcile an auth-state change and publish the result.
    ///
    /// `None` signs the session out. A change superseded by a newer one
    /// publishes nothing and fails with [`AuthError::Superseded`].
    pub async fn on_auth_state_change(&self, principal: Option<Principal>) -> Result<Option<AppUser>, AuthError> {
        let (ticket, remember) = {
            let mut inner = self.inner.write().await;
            inner.principal = principal.clone();
            (self.cell.begin(), inner.persistence.is_remembered())
        };

        let Some(principal) = principal else {
            self.cell.publish(ticket, SessionState::SignedOut);
            return Ok(None);
        };

        match self.reconciler.resolve_role(&principal).await {
            Ok(role) => {
                let user = AppUser::compose(&principal, role, remember);
                if self.cell.publish(ticket, SessionState::SignedIn(user.clone())) {
                    tracing::debug!(session = %self.id, uid = %user.uid, role = %role, "Session reconciled");
                    Ok(Some(user))
                } else {
                    tracing::debug!(session = %self.id, uid = %principal.uid, "Discarding superseded reconciliation");
                    Err(AuthError::Superseded)
                }
            }
            Err(e) => {
                let mut inner = self.inner.write().await;
                if self.cell.publish(ticket, SessionState::SignedOut) {
                    inner.principal = None;
                    inner.provider_session = None;
                }
                Err(AuthError::RoleUnavailable(e))
            }
        }
    }

    /// Email/password sign-in.
    ///
    /// The remember preference only takes effect once the provider accepts
    /// the credentials.
    pub async fn login(&self, email: &str, password: &str, remember_session: bool) -> Result<AppUser, AuthError> {
        let result = self.provider.sign_in_with_password(email, password).await;
        self.settle(result, Some(Persistence::from_remember(remember_session)))
            .await
    }

    /// Third-party sign-in from the outcome of the browser popup.
    pub async fn login_with_provider(&self, outcome: PopupOutcome) -> Result<AppUser, AuthError> {
        let result = match outcome {
            PopupOutcome::Dismissed => Err(ProviderError::PopupDismissed),
            PopupOutcome::Blocked => Err(ProviderError::PopupBlocked),
            PopupOutcome::Completed {
                provider_id,
                id_token,
                access_token,
            } => {
                let credential = IdpCredential {
                    provider_id,
                    id_token,
                    access_token,
                };
                self.provider.sign_in_with_idp(&credential).await
            }
        };
        self.settle(result, None).await
    }

    /// Create an email/password account and sign it in.
    pub async fn register(&self, email: &str, password: &str, display_name: Option<&str>) -> Result<AppUser, AuthError> {
        let result = self.provider.create_account(email, password, display_name).await;
        self.settle(result, None).await
    }

    /// Re-read the role of the signed-in principal.
    pub async fn refresh_role(&self) -> Result<AppUser, AuthError> {
        let principal = self
            .inner
            .read()
            .await
            .principal
            .clone()
            .ok_or(AuthError::NotSignedIn)?;

        self.on_auth_state_change(Some(principal))
            .await?
            .ok_or(AuthError::NotSignedIn)
    }

    /// Exchange the refresh token for a new provider session.
    ///
    /// An expired or revoked refresh token signs the session out.
    pub async fn renew(&self) -> Result<AppUser, AuthError> {
        let refresh_token = self
            .inner
            .read()
            .await
            .provider_session
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(AuthError::NotSignedIn)?;

        match self.provider.refresh(&refresh_token).await {
            Ok(session) => self.establish(session, false, None).await,
            Err(ProviderError::SessionExpired) => {
                tracing::info!(session = %self.id, "Provider session expired, signing out");
                {
                    let mut inner = self.inner.write().await;
                    inner.provider_session = None;
                }
                self.on_auth_state_change(None).await?;
                Err(ProviderError::SessionExpired.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sign out. Always leaves the session signed out; provider and
    /// presence failures are only logged.
    pub async fn logout(&self) {
        let (ticket, provider_session, principal) = {
            let mut inner = self.inner.write().await;
            let ticket = self.cell.begin();
            (ticket, inner.provider_session.take(), inner.principal.take())
        };

        if let Some(session) = provider_session {
            if let Err(e) = self.provider.sign_out(&session).await {
                tracing::warn!(session = %self.id, error = %e, "Provider sign-out failed");
            }
        }

        self.cell.publish(ticket, SessionState::SignedOut);

        if let Some(principal) = principal {
            tracing::info!(session = %self.id, uid = %principal.uid, "Signed out");
            let store = self.reconciler.store().clone();
            tokio::spawn(async move {
                if let Err(e) = store.set_online(&principal.uid, false).await {
                    tracing::warn!(uid = %principal.uid, error = %e, "Failed to clear online flag");
                }
            });
        }
    }

    /// Finish an interactive sign-in. A failed attempt on a session that
    /// never resolved leaves it signed out rather than loading.
    async fn settle(
        &self,
        result: Result<ProviderSession, ProviderError>,
        persistence: Option<Persistence>,
    ) -> Result<AppUser, AuthError> {
        match result {
            Ok(session) => self.establish(session, true, persistence).await,
            Err(e) => {
                if !self.cell.current().is_resolved() {
                    let ticket = {
                        let _inner = self.inner.write().await;
                        self.cell.begin()
                    };
                    self.cell.publish(ticket, SessionState::SignedOut);
                }
                Err(e.into())
            }
        }
    }

    async fn establish(
        &self,
        session: ProviderSession,
        fresh: bool,
        persistence: Option<Persistence>,
    ) -> Result<AppUser, AuthError> {
        let principal = session.principal.clone();
        {
            let mut inner = self.inner.write().await;
            inner.provider_session = Some(session);
            if let Some(persistence) = persistence {
                inner.persistence = persistence;
            }
            if fresh {
                inner.signed_in_at = Utc::now();
            }
        }

        tracing::info!(session = %self.id, uid = %principal.uid, "Provider sign-in succeeded");
        self.on_auth_state_change(Some(principal))
            .await?
            .ok_or(AuthError::Superseded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{RoleStore, SqliteRoleStore};
    use crate::session::RolePolicy;
    use crate::test_util::{FailingRoleStore, FakeIdentityProvider, GatedRoleStore};
    use homestay_common::Role;

    fn session_with(provider: FakeIdentityProvider, store: Arc<dyn RoleStore>, policy: RolePolicy) -> AuthSession {
        AuthSession::new(
            Arc::new(provider),
            Arc::new(RoleReconciler::new(store, policy)),
            SessionLifetimes::default(),
        )
    }

    fn guest_provider() -> FakeIdentityProvider {
        FakeIdentityProvider::new().with_account("guest@example.com", "secret-pw", "u1")
    }

    #[tokio::test]
    async fn test_login_publishes_signed_in_user() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);
        assert_eq!(session.state(), SessionState::Resolving);

        let user = session.login("guest@example.com", "secret-pw", false).await.unwrap();
        assert_eq!(user.uid, "u1");
        assert_eq!(user.role, Role::Tourist);
        assert!(!user.remember_session);
        assert_eq!(session.state(), SessionState::SignedIn(user));
        assert_eq!(session.persistence().await, Persistence::Session);
    }

    #[tokio::test]
    async fn test_failed_first_login_resolves_signed_out() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);

        let err = session.login("guest@example.com", "nope", true).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ProviderError::WrongPassword)));
        assert_eq!(session.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_persistence() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);
        session.login("guest@example.com", "secret-pw", false).await.unwrap();
        let expires_at = session.expires_at().await;

        let err = session.login("guest@example.com", "nope", true).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ProviderError::WrongPassword)));

        assert_eq!(session.persistence().await, Persistence::Session);
        assert!(session.expires_at().await <= expires_at + Duration::minutes(1));
        assert!(session.cookie_max_age().await.is_none());
        assert!(!session.state().user().unwrap().remember_session);
    }

    #[tokio::test]
    async fn test_remembered_login_gets_cookie_max_age() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);

        let user = session.login("guest@example.com", "secret-pw", true).await.unwrap();
        assert!(user.remember_session);

        let max_age = session.cookie_max_age().await.unwrap();
        assert!(max_age > Duration::days(29).num_seconds());
    }

    #[tokio::test]
    async fn test_popup_outcomes_map_to_errors() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);

        let err = session.login_with_provider(PopupOutcome::Dismissed).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ProviderError::PopupDismissed)));

        let err = session.login_with_provider(PopupOutcome::Blocked).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ProviderError::PopupBlocked)));
    }

    #[tokio::test]
    async fn test_completed_popup_signs_in() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);

        let user = session
            .login_with_provider(PopupOutcome::Completed {
                provider_id: "google.com".to_string(),
                id_token: Some("g-42".to_string()),
                access_token: None,
            })
            .await
            .unwrap();
        assert_eq!(user.uid, "g-42");
        assert!(user.remember_session);
    }

    #[tokio::test]
    async fn test_register_creates_tourist() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(FakeIdentityProvider::new(), store.clone(), RolePolicy::Lenient);

        let user = session
            .register("new@example.com", "long-enough", Some("Ana Reyes"))
            .await
            .unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ana Reyes"));
        assert_eq!(user.role, Role::Tourist);

        let record = store.find_by_principal(&user.uid).await.unwrap().unwrap();
        assert_eq!(record.display_name.as_deref(), Some("Ana Reyes"));
    }

    #[tokio::test]
    async fn test_refresh_role_picks_up_promotion() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store.clone(), RolePolicy::Lenient);
        session.login("guest@example.com", "secret-pw", false).await.unwrap();

        let record = store.find_by_principal("u1").await.unwrap().unwrap();
        store.update_role(&record.id, Role::Admin).await.unwrap();

        let user = session.refresh_role().await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(session.state().user().unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn test_refresh_role_requires_sign_in() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);
        assert!(matches!(session.refresh_role().await, Err(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_strict_policy_leaves_session_signed_out() {
        let session = session_with(guest_provider(), Arc::new(FailingRoleStore), RolePolicy::Strict);

        let err = session.login("guest@example.com", "secret-pw", false).await.unwrap_err();
        assert!(matches!(err, AuthError::RoleUnavailable(_)));
        assert_eq!(session.state(), SessionState::SignedOut);
        assert!(matches!(session.refresh_role().await, Err(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_lenient_policy_signs_in_as_tourist() {
        let session = session_with(guest_provider(), Arc::new(FailingRoleStore), RolePolicy::Lenient);
        let user = session.login("guest@example.com", "secret-pw", false).await.unwrap();
        assert_eq!(user.role, Role::Tourist);
    }

    #[tokio::test]
    async fn test_logout_mid_reconciliation_stays_signed_out() {
        let inner = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let gated = Arc::new(GatedRoleStore::new(inner));
        let session = Arc::new(session_with(guest_provider(), gated.clone(), RolePolicy::Lenient));

        let login = {
            let session = session.clone();
            tokio::spawn(async move { session.login("guest@example.com", "secret-pw", false).await })
        };

        gated.wait_entered().await;
        session.logout().await;
        gated.release();

        let result = login.await.unwrap();
        assert!(matches!(result, Err(AuthError::Superseded)));
        assert_eq!(session.state(), SessionState::SignedOut);
        assert!(session.snapshot().user.is_none());
    }

    #[tokio::test]
    async fn test_logout_tolerates_provider_failure() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let provider = Arc::new(guest_provider().failing_sign_out());
        let session = AuthSession::new(
            provider.clone(),
            Arc::new(RoleReconciler::new(store, RolePolicy::Lenient)),
            SessionLifetimes::default(),
        );
        session.login("guest@example.com", "secret-pw", false).await.unwrap();

        session.logout().await;
        assert_eq!(provider.sign_out_count(), 1);
        assert_eq!(session.state(), SessionState::SignedOut);

        // Nothing left to invalidate.
        session.logout().await;
        assert_eq!(provider.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn test_renew_with_revoked_token_signs_out() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let provider = Arc::new(guest_provider());
        let session = AuthSession::new(
            provider.clone(),
            Arc::new(RoleReconciler::new(store, RolePolicy::Lenient)),
            SessionLifetimes::default(),
        );
        session.login("guest@example.com", "secret-pw", false).await.unwrap();

        assert_eq!(session.renew().await.unwrap().uid, "u1");

        provider.revoke_refresh_tokens().await;
        let err = session.renew().await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(ProviderError::SessionExpired)));
        assert_eq!(session.state(), SessionState::SignedOut);
        assert!(matches!(session.renew().await, Err(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_idle_session_expiry() {
        let store = Arc::new(SqliteRoleStore::in_memory().unwrap());
        let session = session_with(guest_provider(), store, RolePolicy::Lenient);

        let now = Utc::now();
        assert!(!session.is_expired(now).await);
        assert!(session.is_expired(now + Duration::hours(25)).await);
    }
}
