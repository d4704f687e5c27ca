//! Session persistence and credential refresh.

use crate::api_client::{ApiClient, RemoteError};
use aquarium_core::Session;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active session")]
    NoSession,

    #[error("credential refresh failed: {0}")]
    Refresh(#[source] RemoteError),

    #[error("session changed while the credential was being refreshed")]
    Superseded,
}

/// Source of the current credential for sync operations.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The persisted session, if any.
    async fn current(&self) -> Result<Option<Session>, SessionError>;

    /// Exchange the refresh token for a new session and persist it.
    ///
    /// The result is only persisted if the stored session still carries the
    /// refresh token the exchange started from. If it was replaced or
    /// cleared in the meantime this fails with [`SessionError::Superseded`]
    /// and the stored session is left alone.
    async fn refresh(&self) -> Result<Session, SessionError>;

    /// Persist a session obtained from sign-in.
    async fn store(&self, session: &Session) -> Result<(), SessionError>;

    /// Forget the session locally.
    async fn clear(&self) -> Result<(), SessionError>;

    /// Revoke the current credential with the identity provider.
    async fn revoke(&self) -> Result<(), SessionError>;
}

/// Session stored as JSON next to the local cache.
pub struct FileSessionStore {
    path: PathBuf,
    api: ApiClient,
    // Serializes refreshes so concurrent callers do not burn the
    // single-use refresh token twice.
    refresh_lock: Mutex<()>,
    // Held for every file mutation; never across network calls.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, api: ApiClient) -> Self {
        Self {
            path: path.into(),
            api,
            refresh_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<Session>, SessionError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&self.path, contents).await?;

        // The file holds bearer credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    async fn remove(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionProvider for FileSessionStore {
    async fn current(&self) -> Result<Option<Session>, SessionError> {
        self.read().await
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn refresh(&self) -> Result<Session, SessionError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.read().await?.ok_or(SessionError::NoSession)?;
        let session = self
            .api
            .refresh(&current.refresh_token)
            .await
            .map_err(SessionError::Refresh)?;

        {
            let _write = self.write_lock.lock().await;
            let still_current = self
                .read()
                .await?
                .is_some_and(|stored| stored.refresh_token == current.refresh_token);
            if still_current {
                self.write(&session).await?;
                tracing::debug!(expires_at = %session.expires_at, "Credential refreshed");
                return Ok(session);
            }
        }

        tracing::info!(user_id = %session.user.id, "Session changed during refresh, dropping result");
        // Nothing references the rotated credential any more.
        if let Err(e) = self.api.logout(&session.access_token).await {
            tracing::debug!(error = %e, "Failed to revoke superseded session");
        }
        Err(SessionError::Superseded)
    }

    async fn store(&self, session: &Session) -> Result<(), SessionError> {
        let _write = self.write_lock.lock().await;
        self.write(session).await
    }

    async fn clear(&self) -> Result<(), SessionError> {
        let _write = self.write_lock.lock().await;
        self.remove().await
    }

    async fn revoke(&self) -> Result<(), SessionError> {
        let Some(session) = self.read().await? else {
            return Ok(());
        };
        self.api
            .logout(&session.access_token)
            .await
            .map_err(SessionError::Refresh)
    }
}
