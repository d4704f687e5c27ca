//! Identity provider: account creation, credential issue and verification.
//!
//! The Keyed Access API only depends on the [`IdentityProvider`] trait. The
//! bundled [`StoreIdentityProvider`] keeps accounts and sessions in the record
//! store database and never persists a raw credential, only its SHA-256 hash.
//! Passwords are stored as argon2id PHC strings.

use aquarium_core::config::AuthConfig;
use aquarium_core::identity::normalize_email;
use aquarium_core::{Session, User, UserId};
use aquarium_store::models::{SessionRow, UserRow};
use aquarium_store::{RecordStore, StoreError};
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identity provider errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid credential: {0}")]
    InvalidToken(String),

    #[error("email already registered: {0}")]
    EmailTaken(String),

    #[error("{0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

/// Resolves credentials to users and manages their sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account.
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> IdentityResult<User>;

    /// Exchange email and password for a fresh session.
    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<Session>;

    /// Exchange a refresh credential for a new session. The old session is revoked.
    async fn refresh(&self, refresh_token: &str) -> IdentityResult<Session>;

    /// Resolve an access credential to its user.
    async fn verify(&self, access_token: &str) -> IdentityResult<User>;

    /// Revoke the session an access credential belongs to.
    async fn revoke(&self, access_token: &str) -> IdentityResult<()>;
}

/// Identity provider backed by the record store's account tables.
pub struct StoreIdentityProvider {
    store: Arc<dyn RecordStore>,
    config: AuthConfig,
}

impl StoreIdentityProvider {
    pub fn new(store: Arc<dyn RecordStore>, config: AuthConfig) -> Self {
        Self { store, config }
    }

    async fn issue_session(&self, user: User) -> IdentityResult<Session> {
        let now = OffsetDateTime::now_utc();
        let access_expires_at = now
            .checked_add(self.config.access_token_ttl())
            .ok_or_else(|| IdentityError::Internal("access credential lifetime overflows".into()))?;
        let refresh_expires_at = now
            .checked_add(self.config.refresh_token_ttl())
            .ok_or_else(|| IdentityError::Internal("refresh credential lifetime overflows".into()))?;

        let access_token = generate_token_secret();
        let refresh_token = generate_token_secret();

        let row = SessionRow {
            session_id: Uuid::new_v4(),
            user_id: *user.id.as_uuid(),
            access_token_hash: hash_token(&access_token),
            refresh_token_hash: hash_token(&refresh_token),
            access_expires_at,
            refresh_expires_at,
            created_at: now,
            revoked_at: None,
        };
        self.store.create_session(&row).await?;

        tracing::debug!(
            user_id = %user.id,
            session_id = %row.session_id,
            "Session issued"
        );

        Ok(Session {
            access_token,
            refresh_token,
            expires_at: access_expires_at,
            user,
        })
    }

    async fn load_user(&self, user_id: Uuid) -> IdentityResult<User> {
        let row = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| IdentityError::InvalidToken("user no longer exists".into()))?;
        Ok(user_from_row(row))
    }
}

#[async_trait]
impl IdentityProvider for StoreIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> IdentityResult<User> {
        let email = normalize_email(email).map_err(|e| IdentityError::Validation(e.to_string()))?;
        if password.chars().count() < self.config.min_password_len {
            return Err(IdentityError::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_len
            )));
        }

        let row = UserRow {
            user_id: Uuid::new_v4(),
            email: email.clone(),
            name: name.trim().to_string(),
            password_hash: hash_password(password)?,
            created_at: OffsetDateTime::now_utc(),
        };

        match self.store.create_user(&row).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => return Err(IdentityError::EmailTaken(email)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %row.user_id, "User account created");
        Ok(user_from_row(row))
    }

    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let Ok(email) = normalize_email(email) else {
            return Err(IdentityError::InvalidCredentials);
        };
        let row = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;

        if !verify_password(password, &row.password_hash) {
            tracing::debug!(user_id = %row.user_id, "Password mismatch");
            return Err(IdentityError::InvalidCredentials);
        }

        self.issue_session(user_from_row(row)).await
    }

    async fn refresh(&self, refresh_token: &str) -> IdentityResult<Session> {
        let now = OffsetDateTime::now_utc();
        let session = self
            .store
            .get_session_by_refresh_hash(&hash_token(refresh_token))
            .await?
            .filter(|s| s.refresh_valid_at(now))
            .ok_or_else(|| IdentityError::InvalidToken("refresh credential expired or revoked".into()))?;

        // Rotation: a refresh credential is good for exactly one exchange.
        if !self.store.revoke_session(session.session_id, now).await? {
            return Err(IdentityError::InvalidToken(
                "refresh credential already used".into(),
            ));
        }

        let user = self.load_user(session.user_id).await?;
        self.issue_session(user).await
    }

    async fn verify(&self, access_token: &str) -> IdentityResult<User> {
        let now = OffsetDateTime::now_utc();
        let session = self
            .store
            .get_session_by_access_hash(&hash_token(access_token))
            .await?
            .ok_or_else(|| IdentityError::InvalidToken("unknown credential".into()))?;

        if !session.access_valid_at(now) {
            return Err(IdentityError::InvalidToken(
                "credential expired or revoked".into(),
            ));
        }

        self.load_user(session.user_id).await
    }

    async fn revoke(&self, access_token: &str) -> IdentityResult<()> {
        let session = self
            .store
            .get_session_by_access_hash(&hash_token(access_token))
            .await?
            .ok_or_else(|| IdentityError::InvalidToken("unknown credential".into()))?;

        self.store
            .revoke_session(session.session_id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(user_id = %session.user_id, session_id = %session.session_id, "Session revoked");
        Ok(())
    }
}

fn user_from_row(row: UserRow) -> User {
    User {
        id: UserId::from(row.user_id),
        email: row.email,
        name: row.name,
    }
}

/// Generate a random credential secret.
fn generate_token_secret() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a credential for storage lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a password into a PHC string (argon2id, default parameters).
fn hash_password(password: &str) -> IdentityResult<String> {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| IdentityError::Internal(format!("password salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Internal(format!("password hashing failed: {e}")))
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
