//! Record store trait and SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::repos::{RecordRepo, SessionRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined store trait.
#[async_trait]
pub trait RecordStore: RecordRepo + UserRepo + SessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;
}

/// SQLite-based record store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store. `":memory:"` opens a private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        let busy_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(5));
        let in_memory = path == Path::new(":memory:");

        let opts = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };
        let opts = opts
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(busy_timeout);

        // SQLite permits limited write concurrency; a single connection avoids
        // "database is locked" failures under axum concurrency. It must also
        // never be recycled, or an in-memory database would vanish with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), in_memory, "SQLite record store opened");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use serde_json::Value;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const UPSERT_RECORD_SQL: &str = r#"
        INSERT INTO records (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
    "#;

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
            let encoded = serde_json::to_string(value)?;
            sqlx::query(UPSERT_RECORD_SQL)
                .bind(key)
                .bind(encoded)
                .bind(OffsetDateTime::now_utc())
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn mset(&self, keys: &[String], values: &[Value]) -> StoreResult<()> {
            if keys.len() != values.len() {
                return Err(StoreError::InvalidArgument(format!(
                    "mset requires equal numbers of keys and values (got {} keys, {} values)",
                    keys.len(),
                    values.len()
                )));
            }
            if keys.is_empty() {
                return Ok(());
            }

            // Encode everything before touching the database so a bad value
            // cannot leave a partially-applied batch behind.
            let encoded = values
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?;
            let now = OffsetDateTime::now_utc();

            let mut tx = self.pool.begin().await?;
            for (key, value) in keys.iter().zip(encoded) {
                sqlx::query(UPSERT_RECORD_SQL)
                    .bind(key)
                    .bind(value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
            let raw: Option<String> =
                sqlx::query_scalar("SELECT value FROM records WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            raw.map(|v| serde_json::from_str(&v).map_err(StoreError::from))
                .transpose()
        }

        async fn del(&self, key: &str) -> StoreResult<()> {
            sqlx::query("DELETE FROM records WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn mdel(&self, keys: &[String]) -> StoreResult<()> {
            if keys.is_empty() {
                return Ok(());
            }
            let mut tx = self.pool.begin().await?;
            for key in keys {
                sqlx::query("DELETE FROM records WHERE key = ?")
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn get_by_prefix(&self, prefix: &str) -> StoreResult<Vec<Value>> {
            // substr() compares literally; LIKE would treat '%' and '_' in ids as wildcards.
            let rows: Vec<String> = sqlx::query_scalar(
                "SELECT value FROM records WHERE substr(key, 1, length(?1)) = ?1",
            )
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
            rows.iter()
                .map(|v| serde_json::from_str(v).map_err(StoreError::from))
                .collect()
        }

        async fn keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
            let keys: Vec<String> = sqlx::query_scalar(
                "SELECT key FROM records WHERE substr(key, 1, length(?1)) = ?1",
            )
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
            Ok(keys)
        }
    }

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> StoreResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO users (user_id, email, name, password_hash, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(user.user_id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists(format!(
                    "user with email '{}' already exists",
                    user.email
                ))),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &SessionRow) -> StoreResult<()> {
            sqlx::query(
                r#"
                INSERT INTO sessions (
                    session_id, user_id, access_token_hash, refresh_token_hash,
                    access_expires_at, refresh_expires_at, created_at, revoked_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.session_id)
            .bind(session.user_id)
            .bind(&session.access_token_hash)
            .bind(&session.refresh_token_hash)
            .bind(session.access_expires_at)
            .bind(session.refresh_expires_at)
            .bind(session.created_at)
            .bind(session.revoked_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_session_by_access_hash(&self, hash: &str) -> StoreResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM sessions WHERE access_token_hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_session_by_refresh_hash(
            &self,
            hash: &str,
        ) -> StoreResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM sessions WHERE refresh_token_hash = ?",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn revoke_session(
            &self,
            session_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> StoreResult<bool> {
            let result = sqlx::query(
                "UPDATE sessions SET revoked_at = ? WHERE session_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_expired_sessions(&self, before: OffsetDateTime) -> StoreResult<u64> {
            let result = sqlx::query("DELETE FROM sessions WHERE refresh_expires_at < ?")
                .bind(before)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Prefix-partitioned JSON records
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- User accounts
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Issued sessions (credential hashes only)
CREATE TABLE IF NOT EXISTS sessions (
    session_id BLOB PRIMARY KEY NOT NULL,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    access_token_hash TEXT NOT NULL UNIQUE,
    refresh_token_hash TEXT NOT NULL UNIQUE,
    access_expires_at TEXT NOT NULL,
    refresh_expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_refresh_expiry ON sessions(refresh_expires_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionRow, UserRow};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn open() -> (TempDir, SqliteStore) {
        let temp = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("records.db"), None)
            .await
            .unwrap();
        (temp, store)
    }

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sorted_ids(values: Vec<Value>) -> Vec<String> {
        let mut ids: Vec<String> = values
            .into_iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_set_overwrites_same_key() {
        let (_temp, store) = open().await;

        store.set("ideas:u:1", &json!({"id": "1", "name": "a"})).await.unwrap();
        store.set("ideas:u:1", &json!({"id": "1", "name": "b"})).await.unwrap();

        let values = store.get_by_prefix("ideas:u:").await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["name"], "b");
        assert_eq!(store.get("ideas:u:1").await.unwrap().unwrap()["name"], "b");
    }

    #[tokio::test]
    async fn test_prefix_isolation() {
        let (_temp, store) = open().await;

        store
            .mset(
                &keys(&["ideas:U1:1", "ideas:U1:2", "ideas:U2:1", "ideas:U10:1"]),
                &[
                    json!({"id": "1", "owner": "U1"}),
                    json!({"id": "2", "owner": "U1"}),
                    json!({"id": "1", "owner": "U2"}),
                    json!({"id": "1", "owner": "U10"}),
                ],
            )
            .await
            .unwrap();

        let u1 = store.get_by_prefix("ideas:U1:").await.unwrap();
        assert_eq!(u1.len(), 2);
        assert!(u1.iter().all(|v| v["owner"] == "U1"));
        assert_eq!(sorted_ids(u1), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_prefix_is_matched_literally() {
        let (_temp, store) = open().await;

        store.set("ideas:a_b:1", &json!({"id": "1"})).await.unwrap();
        store.set("ideas:axb:1", &json!({"id": "1"})).await.unwrap();
        store.set("ideas:100%:1", &json!({"id": "1"})).await.unwrap();

        assert_eq!(store.get_by_prefix("ideas:a_b:").await.unwrap().len(), 1);
        assert_eq!(store.get_by_prefix("ideas:100%:").await.unwrap().len(), 1);
        assert_eq!(store.get_by_prefix("ideas:1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mset_length_mismatch_writes_nothing() {
        let (_temp, store) = open().await;

        let err = store
            .mset(&keys(&["k:1", "k:2"]), &[json!({"id": "1"})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(store.get_by_prefix("k:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mset_duplicate_keys_last_wins() {
        let (_temp, store) = open().await;

        store
            .mset(
                &keys(&["k:1", "k:1"]),
                &[json!({"id": "1", "v": 1}), json!({"id": "1", "v": 2})],
            )
            .await
            .unwrap();

        let values = store.get_by_prefix("k:").await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["v"], 2);
    }

    #[tokio::test]
    async fn test_del_and_mdel_are_idempotent() {
        let (_temp, store) = open().await;

        store.set("k:1", &json!({"id": "1"})).await.unwrap();
        store.del("k:1").await.unwrap();
        store.del("k:1").await.unwrap();
        store.del("k:never").await.unwrap();

        store
            .mset(&keys(&["k:2", "k:3"]), &[json!({"id": "2"}), json!({"id": "3"})])
            .await
            .unwrap();
        store.mdel(&keys(&["k:2", "k:3", "k:missing"])).await.unwrap();
        store.mdel(&[]).await.unwrap();

        assert!(store.get_by_prefix("k:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let (_temp, store) = open().await;

        store
            .mset(
                &keys(&["ideas:u:1", "ideas:u:2", "ideas:v:1"]),
                &[json!({}), json!({}), json!({})],
            )
            .await
            .unwrap();

        let mut found = store.keys_by_prefix("ideas:u:").await.unwrap();
        found.sort();
        assert_eq!(found, keys(&["ideas:u:1", "ideas:u:2"]));
    }

    #[tokio::test]
    async fn test_in_memory_store_survives_between_queries() {
        let store = SqliteStore::new(":memory:", None).await.unwrap();
        store.set("k:1", &json!({"id": "1"})).await.unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.get_by_prefix("k:").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (temp, store) = open().await;
        store.set("k:1", &json!({"id": "1"})).await.unwrap();
        drop(store);

        let reopened = SqliteStore::new(temp.path().join("records.db"), None)
            .await
            .unwrap();
        reopened.migrate().await.unwrap();
        assert_eq!(reopened.get_by_prefix("k:").await.unwrap().len(), 1);
    }

    fn user(email: &str) -> UserRow {
        UserRow {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: "Nemo".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_create_user_duplicate_email() {
        let (_temp, store) = open().await;

        let first = user("fish@example.com");
        store.create_user(&first).await.unwrap();

        let err = store.create_user(&user("fish@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let found = store.get_user_by_email("fish@example.com").await.unwrap().unwrap();
        assert_eq!(found.user_id, first.user_id);
        assert!(store.get_user(first.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (_temp, store) = open().await;
        let owner = user("reef@example.com");
        store.create_user(&owner).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let session = SessionRow {
            session_id: Uuid::new_v4(),
            user_id: owner.user_id,
            access_token_hash: "access-hash".to_string(),
            refresh_token_hash: "refresh-hash".to_string(),
            access_expires_at: now + time::Duration::hours(1),
            refresh_expires_at: now + time::Duration::days(1),
            created_at: now,
            revoked_at: None,
        };
        store.create_session(&session).await.unwrap();

        let by_access = store
            .get_session_by_access_hash("access-hash")
            .await
            .unwrap()
            .unwrap();
        assert!(by_access.access_valid_at(now));

        assert!(store.revoke_session(session.session_id, now).await.unwrap());
        assert!(!store.revoke_session(session.session_id, now).await.unwrap());

        let by_refresh = store
            .get_session_by_refresh_hash("refresh-hash")
            .await
            .unwrap()
            .unwrap();
        assert!(!by_refresh.refresh_valid_at(now));

        let deleted = store
            .delete_expired_sessions(now + time::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
