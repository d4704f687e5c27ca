//! Database models mapping to the store schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Accounts
// =============================================================================

/// Registered user account.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    /// Normalized (trimmed, lowercase) email address. Unique.
    pub email: String,
    pub name: String,
    /// Password hash as an argon2id PHC string.
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Sessions
// =============================================================================

/// Issued session. Only hashes of the credentials are stored.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl SessionRow {
    /// Whether the access credential is usable at `now`.
    pub fn access_valid_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.access_expires_at > now
    }

    /// Whether the refresh credential is usable at `now`.
    pub fn refresh_valid_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.refresh_expires_at > now
    }
}
