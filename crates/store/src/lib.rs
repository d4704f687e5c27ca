//! Record store abstraction and SQLite implementation for aquarium.
//!
//! This crate owns all durable server state:
//! - A flat key/value record space partitioned by key prefix
//! - User accounts and issued sessions for the bundled identity provider

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{RecordStore, SqliteStore};

use aquarium_core::config::StoreConfig;
use std::sync::Arc;

/// Create a record store from configuration.
pub async fn from_config(config: &StoreConfig) -> StoreResult<Arc<dyn RecordStore>> {
    match config {
        StoreConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn RecordStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("aquarium.db");
        let config = StoreConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
