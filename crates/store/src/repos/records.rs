//! Key/value record repository.

use crate::error::StoreResult;
use async_trait::async_trait;
use serde_json::Value;

/// Repository for prefix-partitioned JSON records.
///
/// Keys are opaque strings; callers partition the space by prefix
/// (e.g. `ideas:<user>:<idea>`). All writes are upserts and all deletes are
/// idempotent.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Upsert a single record.
    async fn set(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Upsert many records in one transaction. `keys[i]` is paired with
    /// `values[i]`; mismatched lengths are rejected before anything is written.
    async fn mset(&self, keys: &[String], values: &[Value]) -> StoreResult<()>;

    /// Get a single record.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Remove a record. Removing an absent key is not an error.
    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Remove many records in one transaction.
    async fn mdel(&self, keys: &[String]) -> StoreResult<()>;

    /// All values whose key starts with `prefix`. Order is unspecified.
    async fn get_by_prefix(&self, prefix: &str) -> StoreResult<Vec<Value>>;

    /// All keys starting with `prefix`. Order is unspecified.
    async fn keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
