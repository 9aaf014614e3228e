//! Role datastore.
//!
//! Role records bind a principal id to a [`Role`]. The session reconciler only
//! needs "find by principal", "insert" and "update"; the admin API also lists,
//! re-roles and deletes records.

mod rest;
mod sqlite;

pub use rest::RestRoleStore;
pub use sqlite::SqliteRoleStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homestay_common::{Principal, Role, RoleRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-constraint violation on the principal id.
    #[error("Role record already exists for principal {0}")]
    Conflict(String),
    #[error("Role record not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Fields of a role record created on first sign-in.
#[derive(Debug, Clone)]
pub struct NewRoleRecord {
    pub principal_id: String,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub is_online: bool,
    pub last_login: DateTime<Utc>,
}

impl NewRoleRecord {
    /// Record for a principal seen for the first time: lowest-privilege role,
    /// marked online.
    pub fn first_sign_in(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            principal_id: principal.uid.clone(),
            email: principal.email.clone().unwrap_or_default(),
            role: Role::DEFAULT,
            display_name: principal.display_name.clone(),
            is_online: true,
            last_login: now,
        }
    }
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Fetch the record of a principal, if any.
    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<RoleRecord>, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] when the
    /// principal already has one.
    async fn insert(&self, record: NewRoleRecord) -> Result<RoleRecord, StoreError>;

    /// Mark the principal online and stamp its last login.
    async fn record_login(&self, principal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_online(&self, principal_id: &str, online: bool) -> Result<(), StoreError>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError>;

    /// Change the role of the record with row id `id`.
    async fn update_role(&self, id: &str, role: Role) -> Result<RoleRecord, StoreError>;

    /// Delete the record with row id `id`. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
