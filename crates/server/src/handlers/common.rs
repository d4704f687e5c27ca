//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use aquarium_core::{Idea, UserId};
use axum::extract::Request;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Read and parse a JSON request body, rejecting bodies over `limit` bytes.
pub async fn read_json_body<T: DeserializeOwned>(req: Request, limit: usize) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Record store key prefix holding every idea owned by `user`.
pub fn user_prefix(user: &UserId) -> String {
    format!("ideas:{user}:")
}

/// Record store key for one idea.
pub fn idea_key(user: &UserId, idea_id: &str) -> String {
    format!("ideas:{user}:{idea_id}")
}

/// Turn an untyped `idea` body field into a validated idea.
pub fn parse_idea(value: Option<Value>, field: &str) -> ApiResult<Idea> {
    let value = value.ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest(format!("{field} must be an object")));
    }
    if value.get("id").is_none_or(Value::is_null) {
        return Err(ApiError::BadRequest(format!("{field}.id is required")));
    }
    let idea: Idea = serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("invalid {field}: {e}")))?;
    idea.validate()?;
    Ok(idea)
}

/// `{ "success": true }`
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_share_user_prefix() {
        let user = UserId::new();
        let key = idea_key(&user, "42");
        assert!(key.starts_with(&user_prefix(&user)));
        assert_eq!(key, format!("ideas:{user}:42"));
    }

    #[test]
    fn test_parse_idea() {
        let idea = parse_idea(Some(json!({"id": "7", "name": "Guppy"})), "idea").unwrap();
        assert_eq!(idea.id, "7");
        assert_eq!(idea.name, "Guppy");

        for bad in [
            None,
            Some(json!("not an object")),
            Some(json!({"name": "no id"})),
            Some(json!({"id": null})),
            Some(json!({"id": ""})),
            Some(json!({"id": 7})),
        ] {
            let err = parse_idea(bad, "idea").unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        }
    }
}
