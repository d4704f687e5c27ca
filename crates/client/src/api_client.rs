//! HTTP client for the aquarium Keyed Access API.

use crate::sync::IdeaRemote;
use aquarium_core::{Idea, Session, User};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Header carrying the caller's credential.
pub const USER_TOKEN_HEADER: &str = "X-User-Token";

/// Errors talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The credential was missing, invalid or expired. The only error that
    /// warrants a credential refresh.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for `base_url`, which includes the service prefix
    /// (e.g. `http://127.0.0.1:8080/v1`).
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidUrl(format!("{path}: {e}")))
    }

    fn idea_url(&self, idea_id: &str) -> Result<Url, RemoteError> {
        let mut url = self.url("ideas")?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .push(idea_id);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        credential: Option<&str>,
    ) -> Result<T, RemoteError> {
        let req = match credential {
            Some(token) => req.header(USER_TOKEN_HEADER, token),
            None => req,
        };
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// GET /health
    pub async fn health(&self) -> Result<HealthResponse, RemoteError> {
        let url = self.url("health")?;
        self.send_json(self.http.get(url), None).await
    }

    /// POST /signup
    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User, RemoteError> {
        let url = self.url("signup")?;
        let body = SignupRequest {
            email,
            password,
            name,
        };
        let response: UserResponse = self.send_json(self.http.post(url).json(&body), None).await?;
        Ok(response.user)
    }

    /// POST /auth/token
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        let url = self.url("auth/token")?;
        let body = TokenRequest { email, password };
        self.send_json(self.http.post(url).json(&body), None).await
    }

    /// POST /auth/refresh
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let url = self.url("auth/refresh")?;
        let body = RefreshRequest { refresh_token };
        self.send_json(self.http.post(url).json(&body), None).await
    }

    /// POST /auth/logout
    pub async fn logout(&self, credential: &str) -> Result<(), RemoteError> {
        let url = self.url("auth/logout")?;
        let _: SuccessResponse = self.send_json(self.http.post(url), Some(credential)).await?;
        Ok(())
    }

    /// GET /auth/whoami
    pub async fn whoami(&self, credential: &str) -> Result<User, RemoteError> {
        let url = self.url("auth/whoami")?;
        let response: UserResponse = self.send_json(self.http.get(url), Some(credential)).await?;
        Ok(response.user)
    }
}

#[async_trait]
impl IdeaRemote for ApiClient {
    async fn list_ideas(&self, credential: &str) -> Result<Vec<Idea>, RemoteError> {
        let url = self.url("ideas")?;
        let response: IdeasResponse = self.send_json(self.http.get(url), Some(credential)).await?;
        Ok(response.ideas)
    }

    async fn create_idea(&self, credential: &str, idea: &Idea) -> Result<(), RemoteError> {
        let url = self.url("ideas")?;
        let _: SuccessResponse = self
            .send_json(self.http.post(url).json(&IdeaBody { idea }), Some(credential))
            .await?;
        Ok(())
    }

    async fn update_idea(&self, credential: &str, idea: &Idea) -> Result<(), RemoteError> {
        let url = self.idea_url(&idea.id)?;
        let _: SuccessResponse = self
            .send_json(self.http.put(url).json(&IdeaBody { idea }), Some(credential))
            .await?;
        Ok(())
    }

    async fn delete_idea(&self, credential: &str, idea_id: &str) -> Result<(), RemoteError> {
        let url = self.idea_url(idea_id)?;
        let _: SuccessResponse = self.send_json(self.http.delete(url), Some(credential)).await?;
        Ok(())
    }

    async fn clear_ideas(&self, credential: &str) -> Result<usize, RemoteError> {
        let url = self.url("ideas")?;
        let response: CountResponse = self.send_json(self.http.delete(url), Some(credential)).await?;
        Ok(response.count)
    }

    async fn upload_ideas(&self, credential: &str, ideas: &[Idea]) -> Result<usize, RemoteError> {
        let url = self.url("ideas/batch")?;
        let response: CountResponse = self
            .send_json(self.http.post(url).json(&BatchBody { ideas }), Some(credential))
            .await?;
        Ok(response.count)
    }
}

/// Require an http(s) URL and make it usable as a join base.
fn normalize_base_url(url: &str) -> Result<Url, RemoteError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(RemoteError::InvalidUrl(format!(
            "{url}: server URL must start with http:// or https://"
        )));
    }
    // Url::join replaces the last path segment unless the base ends in '/'.
    let with_slash = format!("{}/", url.trim_end_matches('/'));
    Url::parse(&with_slash).map_err(|e| RemoteError::InvalidUrl(format!("{url}: {e}")))
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());
    if status == StatusCode::UNAUTHORIZED {
        RemoteError::Unauthorized(message)
    } else {
        RemoteError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct IdeaBody<'a> {
    idea: &'a Idea,
}

#[derive(Debug, Serialize)]
struct BatchBody<'a> {
    ideas: &'a [Idea],
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct IdeasResponse {
    ideas: Vec<Idea>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SuccessResponse {
    #[allow(dead_code)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}
