//! Account and session endpoints backed by the identity provider.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::handlers::common::{SuccessResponse, read_json_body};
use crate::state::AppState;
use aquarium_core::{Session, User};
use axum::Json;
use axum::extract::{Request, State};
use serde::{Deserialize, Serialize};

/// Signup request.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

/// Password sign-in request.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

/// Refresh request.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `{ "user": {...} }`
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

/// POST /signup - Create an account. The only idea-store route that needs no credential.
pub async fn signup(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UserResponse>> {
    let body: SignupRequest = read_json_body(req, state.config.server.max_body_size).await?;
    let user = state
        .identity
        .sign_up(&body.email, &body.password, &body.name)
        .await?;
    Ok(Json(UserResponse { user }))
}

/// POST /auth/token - Exchange email and password for a session.
pub async fn issue_token(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Session>> {
    let body: TokenRequest = read_json_body(req, state.config.server.max_body_size).await?;
    let session = state.identity.sign_in(&body.email, &body.password).await?;
    tracing::info!(user_id = %session.user.id, "Signed in");
    Ok(Json(session))
}

/// POST /auth/refresh - Rotate a session.
pub async fn refresh_token(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Session>> {
    let body: RefreshRequest = read_json_body(req, state.config.server.max_body_size).await?;
    let session = state.identity.refresh(&body.refresh_token).await?;
    tracing::debug!(user_id = %session.user.id, "Session refreshed");
    Ok(Json(session))
}

/// POST /auth/logout - Revoke the caller's session.
pub async fn logout(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<SuccessResponse>> {
    let credential = require_auth(&req)?.credential.clone();
    state.identity.revoke(&credential).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// GET /auth/whoami - Return the caller's identity.
pub async fn whoami(req: Request) -> ApiResult<Json<UserResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(UserResponse {
        user: auth.user.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use aquarium_core::UserId;
    use axum::body::Body;

    #[tokio::test]
    async fn test_whoami_returns_extension_user() {
        let user = User {
            id: UserId::new(),
            email: "a@b.c".into(),
            name: "Dory".into(),
        };
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(AuthenticatedUser {
            user: user.clone(),
            credential: "secret".into(),
        });

        let Json(response) = whoami(req).await.unwrap();
        assert_eq!(response.user, user);
    }

    #[tokio::test]
    async fn test_whoami_without_auth() {
        let err = whoami(Request::new(Body::empty())).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
