use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use homestay_common::{Role, RoleRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{NewRoleRecord, RoleStore, StoreError};

const SELECT_COLUMNS: &str =
    "id, principal_id, email, role, display_name, is_online, last_login, created_at, updated_at";

/// SQLite-backed role store.
pub struct SqliteRoleStore {
    conn: Mutex<Connection>,
}

/// Row as stored; text columns are parsed in [`RawRecord::into_record`].
struct RawRecord {
    id: String,
    principal_id: String,
    email: String,
    role: String,
    display_name: Option<String>,
    is_online: Option<bool>,
    last_login: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            principal_id: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            display_name: row.get(4)?,
            is_online: row.get::<_, Option<i32>>(5)?.map(|v| v != 0),
            last_login: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<RoleRecord, StoreError> {
        let role: Role = self
            .role
            .parse()
            .map_err(|e| StoreError::InvalidRecord(format!("{}: {}", self.id, e)))?;

        Ok(RoleRecord {
            role,
            last_login: self.last_login.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            principal_id: self.principal_id,
            email: self.email,
            display_name: self.display_name,
            is_online: self.is_online,
        })
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp {:?}: {}", value, e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn db_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

impl SqliteRoleStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(db_error)?;
        let store = Self::from_connection(conn)?;

        tracing::info!("Role store initialized with database: {}", path);
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(db_error)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                principal_id TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'tourist'
                    CHECK (role IN ('tourist', 'staff', 'manager', 'admin')),
                display_name TEXT,
                is_online INTEGER,
                last_login TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_error)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at)",
            [],
        )
        .map_err(db_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn find_where(conn: &Connection, column: &str, value: &str) -> Result<Option<RoleRecord>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", SELECT_COLUMNS, column);
        conn.query_row(&sql, params![value], RawRecord::from_row)
            .optional()
            .map_err(db_error)?
            .map(RawRecord::into_record)
            .transpose()
    }
}

#[async_trait]
impl RoleStore for SqliteRoleStore {
    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<RoleRecord>, StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        Self::find_where(&conn, "principal_id", principal_id)
    }

    async fn insert(&self, record: NewRoleRecord) -> Result<RoleRecord, StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let result = conn.execute(
            "INSERT INTO users (id, principal_id, email, role, display_name, is_online, last_login, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                record.principal_id,
                record.email,
                record.role.as_str(),
                record.display_name,
                record.is_online as i32,
                format_timestamp(record.last_login),
                format_timestamp(now),
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Conflict(record.principal_id)),
            Err(e) => return Err(db_error(e)),
        }

        tracing::info!(
            "Created role record for {} ({}) as {}",
            record.principal_id,
            record.email,
            record.role
        );

        Self::find_where(&conn, "id", &id)?.ok_or(StoreError::NotFound(id))
    }

    async fn record_login(&self, principal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        let changed = conn
            .execute(
                "UPDATE users SET is_online = 1, last_login = ?1 WHERE principal_id = ?2",
                params![format_timestamp(at), principal_id],
            )
            .map_err(db_error)?;

        if changed == 0 {
            return Err(StoreError::NotFound(principal_id.to_string()));
        }
        Ok(())
    }

    async fn set_online(&self, principal_id: &str, online: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        let changed = conn
            .execute(
                "UPDATE users SET is_online = ?1 WHERE principal_id = ?2",
                params![online as i32, principal_id],
            )
            .map_err(db_error)?;

        if changed == 0 {
            return Err(StoreError::NotFound(principal_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC",
            SELECT_COLUMNS
        );

        let mut stmt = conn.prepare(&sql).map_err(db_error)?;
        let rows = stmt
            .query_map([], RawRecord::from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        rows.into_iter().map(RawRecord::into_record).collect()
    }

    async fn update_role(&self, id: &str, role: Role) -> Result<RoleRecord, StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        let changed = conn
            .execute(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                params![role.as_str(), format_timestamp(Utc::now()), id],
            )
            .map_err(db_error)?;

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        tracing::info!("Role record {} changed to {}", id, role);
        Self::find_where(&conn, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(db_error)?;
        let changed = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(db_error)?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestay_common::Principal;

    fn new_record(uid: &str) -> NewRoleRecord {
        NewRoleRecord::first_sign_in(
            &Principal::new(uid, Some(&format!("{}@example.com", uid))),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let store = SqliteRoleStore::in_memory().unwrap();

        let created = store.insert(new_record("u1")).await.unwrap();
        assert_eq!(created.principal_id, "u1");
        assert_eq!(created.role, Role::Tourist);
        assert_eq!(created.is_online, Some(true));
        assert!(created.last_login.is_some());

        let found = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_find_missing_principal_is_none() {
        let store = SqliteRoleStore::in_memory().unwrap();
        assert!(store.find_by_principal("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_principal_is_conflict() {
        let store = SqliteRoleStore::in_memory().unwrap();
        store.insert(new_record("u1")).await.unwrap();

        let err = store.insert(new_record("u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(uid) if uid == "u1"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_role_and_refetch() {
        let store = SqliteRoleStore::in_memory().unwrap();
        let created = store.insert(new_record("u1")).await.unwrap();

        let updated = store.update_role(&created.id, Role::Admin).await.unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert!(updated.updated_at >= created.updated_at);

        let found = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(found.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_update_role_unknown_id() {
        let store = SqliteRoleStore::in_memory().unwrap();
        let err = store.update_role("missing", Role::Staff).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteRoleStore::in_memory().unwrap();
        let created = store.insert(new_record("u1")).await.unwrap();

        assert!(store.delete(&created.id).await.unwrap());
        assert!(!store.delete(&created.id).await.unwrap());
        assert!(store.find_by_principal("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = SqliteRoleStore::in_memory().unwrap();
        store.insert(new_record("u1")).await.unwrap();
        store.insert(new_record("u2")).await.unwrap();
        store.insert(new_record("u3")).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.principal_id)
            .collect();
        assert_eq!(ids, vec!["u3", "u2", "u1"]);
    }

    #[tokio::test]
    async fn test_presence_updates() {
        let store = SqliteRoleStore::in_memory().unwrap();
        store.insert(new_record("u1")).await.unwrap();

        store.set_online("u1", false).await.unwrap();
        let record = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(record.is_online, Some(false));

        let later = Utc::now() + chrono::Duration::minutes(5);
        store.record_login("u1", later).await.unwrap();
        let record = store.find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(record.is_online, Some(true));
        assert_eq!(record.last_login.map(format_timestamp), Some(format_timestamp(later)));
        assert_eq!(record.role, Role::Tourist);
    }

    #[tokio::test]
    async fn test_presence_update_for_unknown_principal() {
        let store = SqliteRoleStore::in_memory().unwrap();
        assert!(matches!(
            store.set_online("ghost", false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("roles.db");
        let url = format!("sqlite:{}", db_path.display());

        {
            let store = SqliteRoleStore::new(&url).unwrap();
            store.insert(new_record("u1")).await.unwrap();
        }

        let reopened = SqliteRoleStore::new(&url).unwrap();
        assert!(reopened.find_by_principal("u1").await.unwrap().is_some());
    }
}
