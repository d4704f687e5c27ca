//! Application state shared across handlers.

use crate::identity::{IdentityProvider, StoreIdentityProvider};
use aquarium_core::config::AppConfig;
use aquarium_store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Record store.
    pub store: Arc<dyn RecordStore>,
    /// Identity verifier consulted by the auth middleware.
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Create a new application state using the bundled identity provider.
    pub fn new(config: AppConfig, store: Arc<dyn RecordStore>) -> Self {
        let identity = Arc::new(StoreIdentityProvider::new(store.clone(), config.auth.clone()));
        Self::with_identity(config, store, identity)
    }

    /// Create a new application state with an external identity provider.
    pub fn with_identity(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            identity,
        }
    }
}

/// Spawn a background task that periodically deletes sessions whose refresh
/// credential has expired.
pub fn spawn_session_cleanup(store: Arc<dyn RecordStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.delete_expired_sessions(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "Expired sessions removed"),
                Err(e) => tracing::warn!(error = %e, "Failed to remove expired sessions"),
            }
        }
    })
}
