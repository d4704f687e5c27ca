//! Server test utilities.

use aquarium_core::Session;
use aquarium_core::config::{AppConfig, StoreConfig};
use aquarium_server::{AppState, create_router};
use aquarium_store::{RecordStore, SqliteStore};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Default password used by [`TestServer::login`].
#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "correct horse";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server backed by a temporary SQLite database.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("aquarium.db");
        let store: Arc<dyn RecordStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create record store"),
        );

        let mut config = AppConfig {
            store: StoreConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying record store.
    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.state.store.clone()
    }

    /// Prefix every API route is mounted under.
    pub fn path(&self, route: &str) -> String {
        format!("{}{route}", self.state.config.server.api_prefix)
    }

    /// Create an account and sign in, returning the session.
    pub async fn login(&self, email: &str) -> Session {
        self.state
            .identity
            .sign_up(email, TEST_PASSWORD, "Test User")
            .await
            .expect("Failed to sign up");
        self.state
            .identity
            .sign_in(email, TEST_PASSWORD)
            .await
            .expect("Failed to sign in")
    }

    /// Send a JSON request authenticated with `X-User-Token`.
    pub async fn request(
        &self,
        method: &str,
        route: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let headers: Vec<(&str, String)> = token
            .map(|t| vec![("X-User-Token", t.to_string())])
            .unwrap_or_default();
        json_request(&self.router, method, &self.path(route), body, &headers).await
    }
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, String)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
