//! Server configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Fixed path prefix every API route is mounted under (e.g., "/v1").
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Cross-origin access for browser front ends.
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_api_prefix() -> String {
    "/v1".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
            max_body_size: default_max_body_size(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate the prefix can be used to nest routes.
    pub fn validate(&self) -> Result<(), String> {
        let prefix = self.api_prefix.as_str();
        if prefix.is_empty() {
            return Ok(());
        }
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(format!(
                "server.api_prefix '{prefix}' must start with '/' and must not end with '/'"
            ));
        }
        Ok(())
    }
}

/// CORS policy. An empty origin list disables CORS entirely.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    /// How long browsers may cache a preflight response.
    #[serde(default = "default_cors_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_max_age_secs() -> u64 {
    600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_cors_origins(),
            max_age_secs: default_cors_max_age_secs(),
        }
    }
}

impl CorsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }

    /// Every origin must be `*` or an http(s) origin without a path.
    pub fn validate(&self) -> Result<(), String> {
        for origin in &self.allowed_origins {
            if origin == "*" {
                continue;
            }
            let rest = origin
                .strip_prefix("https://")
                .or_else(|| origin.strip_prefix("http://"));
            match rest {
                Some(host) if !host.is_empty() && !host.contains('/') => {}
                _ => {
                    return Err(format!(
                        "server.cors.allowed_origins entry '{origin}' must look like https://host[:port]"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path (or ":memory:").
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/aquarium.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Identity provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of an access credential in seconds.
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    /// Lifetime of a refresh credential in seconds.
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    /// Minimum accepted password length at signup.
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

fn default_access_token_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_refresh_token_ttl_secs() -> u64 {
    30 * 24 * 3600 // 30 days
}

fn default_min_password_len() -> usize {
    6
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: default_access_token_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
            min_password_len: default_min_password_len(),
        }
    }
}

impl AuthConfig {
    /// Access credential lifetime as a Duration.
    pub fn access_token_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        Duration::seconds(i64::try_from(self.access_token_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Refresh credential lifetime as a Duration.
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.refresh_token_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Validate token lifetimes.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_token_ttl_secs == 0 {
            return Err("auth.access_token_ttl_secs must be greater than 0".to_string());
        }
        if self.refresh_token_ttl_secs < self.access_token_ttl_secs {
            return Err(format!(
                "auth.refresh_token_ttl_secs ({}) must not be shorter than auth.access_token_ttl_secs ({})",
                self.refresh_token_ttl_secs, self.access_token_ttl_secs
            ));
        }
        Ok(())
    }
}

/// Complete server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Record store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Identity provider configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses an in-memory SQLite store.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            auth: AuthConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.server.cors.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}
