//! Session repository.

use crate::error::StoreResult;
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for issued sessions.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a session.
    async fn create_session(&self, session: &SessionRow) -> StoreResult<()>;

    /// Get a session by access credential hash.
    async fn get_session_by_access_hash(&self, hash: &str) -> StoreResult<Option<SessionRow>>;

    /// Get a session by refresh credential hash.
    async fn get_session_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<SessionRow>>;

    /// Revoke a session. Returns false if it was unknown or already revoked.
    async fn revoke_session(&self, session_id: Uuid, revoked_at: OffsetDateTime)
    -> StoreResult<bool>;

    /// Delete sessions whose refresh credential expired before `before`.
    async fn delete_expired_sessions(&self, before: OffsetDateTime) -> StoreResult<u64>;
}
