//! Client configuration and on-disk locations.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default server base URL, including the service prefix.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/v1";

/// Background pull cadence while signed in.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Keyed Access API.
    pub server_url: String,
    /// Local cache file. Defaults to the XDG data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Persisted session file. Defaults to the XDG data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<PathBuf>,
    pub sync_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            cache_path: None,
            session_path: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl ClientConfig {
    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("ideas.json")),
        }
    }

    pub fn session_path(&self) -> Result<PathBuf> {
        match &self.session_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("session.json")),
        }
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

/// Resolve the client config file: explicit path, then
/// `AQUARIUM_CLIENT_CONFIG`, then `$XDG_CONFIG_HOME/aquarium/client.toml`.
pub fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("AQUARIUM_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set AQUARIUM_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("aquarium").join("client.toml"))
}

fn data_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_DATA_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set XDG_DATA_HOME"))?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(base.join("aquarium"))
}

/// Load client config from `path` (if it exists) layered under
/// `AQUARIUM_` environment variables.
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment
        .merge(Env::prefixed("AQUARIUM_").only(&[
            "server_url",
            "cache_path",
            "session_path",
            "sync_interval_secs",
        ]))
        .extract()
        .with_context(|| format!("failed to load client configuration from {}", path.display()))
}

pub async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::ffi::OsString;
    use std::future::Future;
    use std::sync::OnceLock;
    use tokio::sync::Mutex;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub async fn with_env_lock<F, Fut, T>(action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().await;
        action().await
    }

    pub struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        pub fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: callers hold ENV_LOCK
            unsafe { std::env::set_var(key, value) };
            Self { key, prev }
        }

        pub fn unset(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: callers hold ENV_LOCK
            unsafe { std::env::remove_var(key) };
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: callers hold ENV_LOCK
            unsafe {
                if let Some(value) = self.prev.take() {
                    std::env::set_var(self.key, value);
                } else {
                    std::env::remove_var(self.key);
                }
            }
        }
    }
}
