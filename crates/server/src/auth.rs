//! Authentication middleware.

use crate::error::{ApiError, ApiResult};
use crate::identity::IdentityError;
use crate::state::AppState;
use aquarium_core::User;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the caller's credential. Preferred over `Authorization`.
pub const USER_TOKEN_HEADER: &str = "x-user-token";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    /// The verified user.
    pub user: User,
    /// The credential the request was authenticated with.
    pub credential: String,
}

/// Reason a presented credential was not accepted.
#[derive(Clone, Debug)]
struct AuthRejection(String);

/// Extract the caller's credential: `X-User-Token` first, then
/// `Authorization: Bearer`. Per RFC 6750 the scheme is case-insensitive.
fn extract_credential(req: &Request) -> Option<&str> {
    let headers = req.headers();
    if let Some(token) = headers
        .get(USER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        && !token.is_empty()
    {
        return Some(token);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v.is_char_boundary(7) && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Authentication middleware that verifies credentials and sets up trace context.
///
/// Requests without a valid credential are passed through unauthenticated;
/// handlers that need an identity call [`require_auth`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(credential) = extract_credential(&req).map(str::to_owned) {
        match state.identity.verify(&credential).await {
            Ok(user) => {
                req.extensions_mut()
                    .insert(AuthenticatedUser { user, credential });
            }
            Err(e @ (IdentityError::InvalidToken(_) | IdentityError::InvalidCredentials)) => {
                tracing::debug!(trace_id = %trace_id_str, error = %e, "Credential rejected");
                req.extensions_mut().insert(AuthRejection(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require authentication (a verified credential must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
        return Ok(user);
    }
    match req.extensions().get::<AuthRejection>() {
        Some(AuthRejection(reason)) => Err(ApiError::Unauthorized(reason.clone())),
        None => Err(ApiError::Unauthorized("authentication required".to_string())),
    }
}
