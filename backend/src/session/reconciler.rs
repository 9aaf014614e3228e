use std::sync::Arc;

use chrono::Utc;
use homestay_common::{Principal, Role};

use super::RolePolicy;
use crate::roles::{NewRoleRecord, RoleStore, StoreError};

/// Derives the role of a principal from the role datastore, creating the
/// record on first sign-in.
pub struct RoleReconciler {
    store: Arc<dyn RoleStore>,
    policy: RolePolicy,
}

impl RoleReconciler {
    pub fn new(store: Arc<dyn RoleStore>, policy: RolePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn RoleStore> {
        &self.store
    }

    pub fn policy(&self) -> RolePolicy {
        self.policy
    }

    /// Resolve the role of `principal`.
    ///
    /// Datastore failures resolve to [`Role::DEFAULT`] under the lenient
    /// policy and are returned under the strict one.
    pub async fn resolve_role(&self, principal: &Principal) -> Result<Role, StoreError> {
        match self.fetch_or_create(principal).await {
            Ok(role) => Ok(role),
            Err(e) => match self.policy {
                RolePolicy::Lenient => {
                    tracing::warn!(
                        uid = %principal.uid,
                        error = %e,
                        "Role lookup failed, falling back to {}",
                        Role::DEFAULT
                    );
                    Ok(Role::DEFAULT)
                }
                RolePolicy::Strict => {
                    tracing::warn!(uid = %principal.uid, error = %e, "Role lookup failed");
                    Err(e)
                }
            },
        }
    }

    async fn fetch_or_create(&self, principal: &Principal) -> Result<Role, StoreError> {
        let now = Utc::now();

        if let Some(record) = self.store.find_by_principal(&principal.uid).await? {
            if let Err(e) = self.store.record_login(&principal.uid, now).await {
                tracing::warn!(uid = %principal.uid, error = %e, "Failed to record login");
            }
            tracing::debug!(uid = %principal.uid, role = %record.role, "Resolved stored role");
            return Ok(record.role);
        }

        match self.store.insert(NewRoleRecord::first_sign_in(principal, now)).await {
            Ok(record) => Ok(record.role),
            Err(StoreError::Conflict(_)) => {
                // Another session created the record first.
                tracing::debug!(uid = %principal.uid, "Role record created concurrently, re-fetching");
                self.store
                    .find_by_principal(&principal.uid)
                    .await?
                    .map(|record| record.role)
                    .ok_or_else(|| StoreError::NotFound(principal.uid.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::SqliteRoleStore;
    use crate::test_util::{FailingRoleStore, RacingRoleStore};

    fn principal(uid: &str) -> Principal {
        Principal::new(uid, Some(format!("{}@example.com", uid).as_str()))
    }

    fn sqlite() -> Arc<SqliteRoleStore> {
        Arc::new(SqliteRoleStore::in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_tourist_record() {
        let store = sqlite();
        let reconciler = RoleReconciler::new(store.clone(), RolePolicy::Lenient);

        let role = reconciler.resolve_role(&principal("u1")).await.unwrap();
        assert_eq!(role, Role::Tourist);

        let record = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(record.role, Role::Tourist);
        assert_eq!(record.email, "u1@example.com");
        assert_eq!(record.is_online, Some(true));
        assert!(record.last_login.is_some());
    }

    #[tokio::test]
    async fn test_known_principal_keeps_stored_role() {
        let store = sqlite();
        let mut record = NewRoleRecord::first_sign_in(&principal("u1"), Utc::now());
        record.role = Role::Manager;
        record.is_online = false;
        let created = store.insert(record).await.unwrap();

        let reconciler = RoleReconciler::new(store.clone(), RolePolicy::Lenient);
        assert_eq!(reconciler.resolve_role(&principal("u1")).await.unwrap(), Role::Manager);

        let after = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(after.role, Role::Manager);
        assert_eq!(after.is_online, Some(true));
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(after.id, created.id);
    }

    #[tokio::test]
    async fn test_lenient_policy_falls_back_to_tourist() {
        let reconciler = RoleReconciler::new(Arc::new(FailingRoleStore), RolePolicy::Lenient);
        assert_eq!(reconciler.resolve_role(&principal("u1")).await.unwrap(), Role::Tourist);
    }

    #[tokio::test]
    async fn test_strict_policy_surfaces_store_error() {
        let reconciler = RoleReconciler::new(Arc::new(FailingRoleStore), RolePolicy::Strict);
        let err = reconciler.resolve_role(&principal("u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_sign_ins_create_one_record() {
        let inner = sqlite();
        let store = Arc::new(RacingRoleStore::new(inner.clone(), 2));
        let reconciler = Arc::new(RoleReconciler::new(store, RolePolicy::Strict));

        let a = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.resolve_role(&principal("u2")).await })
        };
        let b = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.resolve_role(&principal("u2")).await })
        };

        assert_eq!(a.await.unwrap().unwrap(), Role::Tourist);
        assert_eq!(b.await.unwrap().unwrap(), Role::Tourist);
        assert_eq!(inner.list().await.unwrap().len(), 1);
    }
}
