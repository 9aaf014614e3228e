use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homestay_common::{Role, RoleRecord};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{NewRoleRecord, RoleStore, StoreError};

/// Postgres error code for unique violations, passed through by PostgREST.
const UNIQUE_VIOLATION: &str = "23505";

/// Role store backed by a hosted PostgREST table.
///
/// The table keys principals by `firebase_uid`; `created_at` and
/// `updated_at` are filled in by column defaults.
pub struct RestRoleStore {
    http_client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

#[derive(Debug, Deserialize)]
struct RestRow {
    id: String,
    firebase_uid: String,
    email: String,
    role: Role,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    is_online: Option<bool>,
    #[serde(default)]
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RestRow> for RoleRecord {
    fn from(row: RestRow) -> Self {
        RoleRecord {
            id: row.id,
            principal_id: row.firebase_uid,
            email: row.email,
            role: row.role,
            display_name: row.display_name,
            is_online: row.is_online,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    firebase_uid: &'a str,
    email: &'a str,
    role: Role,
    display_name: Option<&'a str>,
    is_online: bool,
    last_login: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RestRoleStore {
    pub fn new(base_url: &str, api_key: &str, table: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: table.to_string(),
        }
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/{}", self.base_url, self.table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Send a request expecting a JSON array of rows back.
    async fn rows(&self, request: RequestBuilder, principal_id: Option<&str>) -> Result<Vec<RestRow>, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<RestError> = serde_json::from_str(&body).ok();
            let code = parsed.as_ref().and_then(|e| e.code.as_deref());

            if code == Some(UNIQUE_VIOLATION) {
                return Err(StoreError::Conflict(principal_id.unwrap_or_default().to_string()));
            }

            let message = parsed
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(StoreError::DatabaseError(format!("{}: {}", status, message)));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))
    }

    /// PATCH rows matching `filter` and return them.
    async fn patch(
        &self,
        filter: (&str, String),
        body: serde_json::Value,
    ) -> Result<Vec<RestRow>, StoreError> {
        let request = self
            .request(Method::PATCH)
            .query(&[filter])
            .header("Prefer", "return=representation")
            .json(&body);
        self.rows(request, None).await
    }
}

#[async_trait]
impl RoleStore for RestRoleStore {
    async fn find_by_principal(&self, principal_id: &str) -> Result<Option<RoleRecord>, StoreError> {
        let request = self.request(Method::GET).query(&[
            ("select", "*".to_string()),
            ("firebase_uid", format!("eq.{}", principal_id)),
            ("limit", "1".to_string()),
        ]);
        let rows = self.rows(request, Some(principal_id)).await?;
        Ok(rows.into_iter().next().map(RoleRecord::from))
    }

    async fn insert(&self, record: NewRoleRecord) -> Result<RoleRecord, StoreError> {
        let body = InsertRow {
            firebase_uid: &record.principal_id,
            email: &record.email,
            role: record.role,
            display_name: record.display_name.as_deref(),
            is_online: record.is_online,
            last_login: record.last_login,
        };
        let request = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(&body);

        let row = self
            .rows(request, Some(&record.principal_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidRecord("insert returned no row".to_string()))?;

        tracing::info!(
            "Created role record for {} ({}) as {}",
            row.firebase_uid,
            row.email,
            row.role
        );
        Ok(row.into())
    }

    async fn record_login(&self, principal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let rows = self
            .patch(
                ("firebase_uid", format!("eq.{}", principal_id)),
                json!({ "is_online": true, "last_login": at }),
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(principal_id.to_string()));
        }
        Ok(())
    }

    async fn set_online(&self, principal_id: &str, online: bool) -> Result<(), StoreError> {
        let rows = self
            .patch(
                ("firebase_uid", format!("eq.{}", principal_id)),
                json!({ "is_online": online }),
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(principal_id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RoleRecord>, StoreError> {
        let request = self
            .request(Method::GET)
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let rows = self.rows(request, None).await?;
        Ok(rows.into_iter().map(RoleRecord::from).collect())
    }

    async fn update_role(&self, id: &str, role: Role) -> Result<RoleRecord, StoreError> {
        let rows = self
            .patch(
                ("id", format!("eq.{}", id)),
                json!({ "role": role, "updated_at": Utc::now() }),
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        tracing::info!("Role record {} changed to {}", id, role);
        Ok(row.into())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let request = self
            .request(Method::DELETE)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        let rows = self.rows(request, None).await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestay_common::Principal;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(id: &str, uid: &str, role: &str) -> serde_json::Value {
        json!({
            "id": id,
            "firebase_uid": uid,
            "email": format!("{}@example.com", uid),
            "role": role,
            "display_name": null,
            "is_online": true,
            "last_login": "2026-03-01T10:00:00.000000+00:00",
            "created_at": "2026-03-01T10:00:00.000000+00:00",
            "updated_at": "2026-03-01T10:00:00.000000+00:00",
            "created_by": null,
            "updated_by": null
        })
    }

    fn store_for(server: &MockServer) -> RestRoleStore {
        RestRoleStore::new(&server.uri(), "anon-key", "users")
    }

    #[tokio::test]
    async fn test_find_by_principal_filters_and_authenticates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("firebase_uid", "eq.u1"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("r1", "u1", "manager")])))
            .mount(&server)
            .await;

        let record = store_for(&server).find_by_principal("u1").await.unwrap().unwrap();
        assert_eq!(record.id, "r1");
        assert_eq!(record.principal_id, "u1");
        assert_eq!(record.role, Role::Manager);
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(store_for(&server).find_by_principal("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_unique_violation_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(body_partial_json(json!({ "firebase_uid": "u2", "role": "tourist" })))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"users_firebase_uid_key\"",
                "details": null,
                "hint": null
            })))
            .mount(&server)
            .await;

        let record = NewRoleRecord::first_sign_in(&Principal::new("u2", Some("u2@example.com")), Utc::now());
        let err = store_for(&server).insert(record).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(uid) if uid == "u2"));
    }

    #[tokio::test]
    async fn test_insert_returns_created_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(header("prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([row("r9", "u9", "tourist")])))
            .mount(&server)
            .await;

        let record = NewRoleRecord::first_sign_in(&Principal::new("u9", Some("u9@example.com")), Utc::now());
        let created = store_for(&server).insert(record).await.unwrap();
        assert_eq!(created.id, "r9");
        assert_eq!(created.role, Role::Tourist);
    }

    #[tokio::test]
    async fn test_other_errors_are_database_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "PGRST301",
                "message": "JWT expired"
            })))
            .mount(&server)
            .await;

        let err = store_for(&server).list().await.unwrap_err();
        assert!(matches!(err, StoreError::DatabaseError(msg) if msg.contains("JWT expired")));
    }

    #[tokio::test]
    async fn test_update_role_unknown_id_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/users"))
            .and(query_param("id", "eq.missing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = store_for(&server).update_role("missing", Role::Admin).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_role_sends_new_role() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/users"))
            .and(query_param("id", "eq.r1"))
            .and(body_partial_json(json!({ "role": "admin" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("r1", "u1", "admin")])))
            .mount(&server)
            .await;

        let record = store_for(&server).update_role("r1", Role::Admin).await.unwrap();
        assert_eq!(record.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_row_existed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/users"))
            .and(query_param("id", "eq.r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("r1", "u1", "tourist")])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/users"))
            .and(query_param("id", "eq.r2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert!(store.delete("r1").await.unwrap());
        assert!(!store.delete("r2").await.unwrap());
    }
}
