//! Keyed Access API: per-user idea records.
//!
//! Every handler resolves the caller, then performs exactly one record store
//! operation (or one batch) under the caller's `ideas:<user>:` prefix.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{SuccessResponse, idea_key, parse_idea, read_json_body, user_prefix};
use crate::state::AppState;
use aquarium_core::Idea;
use axum::Json;
use axum::extract::{Path, Request, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "ideas": [...] }`
#[derive(Debug, Serialize)]
pub struct IdeasResponse {
    pub ideas: Vec<Idea>,
}

/// `{ "success": true, "idea": {...} }`
#[derive(Debug, Serialize)]
pub struct IdeaResponse {
    pub success: bool,
    pub idea: Idea,
}

/// `{ "success": true, "count": n }`
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct IdeaBody {
    #[serde(default)]
    idea: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    #[serde(default)]
    ideas: Option<Value>,
}

/// GET /ideas - All ideas owned by the caller, in no particular order.
pub async fn list_ideas(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<IdeasResponse>> {
    let user_id = require_auth(&req)?.user.id;
    let values = state.store.get_by_prefix(&user_prefix(&user_id)).await?;

    let ideas = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Idea>(value) {
            Ok(idea) => Some(idea),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Skipping unreadable stored idea");
                None
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(user_id = %user_id, count = ideas.len(), "Listed ideas");
    Ok(Json(IdeasResponse { ideas }))
}

/// POST /ideas - Store one idea (upsert by id).
pub async fn create_idea(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<IdeaResponse>> {
    let user_id = require_auth(&req)?.user.id;
    let body: IdeaBody = read_json_body(req, state.config.server.max_body_size).await?;
    let idea = parse_idea(body.idea, "idea")?;

    state
        .store
        .set(&idea_key(&user_id, &idea.id), &serde_json::to_value(&idea).map_err(internal)?)
        .await?;

    tracing::debug!(user_id = %user_id, idea_id = %idea.id, "Idea stored");
    Ok(Json(IdeaResponse {
        success: true,
        idea,
    }))
}

/// POST /ideas/batch - Store many ideas in one transaction (upsert by id).
pub async fn upload_ideas(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CountResponse>> {
    let user_id = require_auth(&req)?.user.id;
    let body: BatchBody = read_json_body(req, state.config.server.max_body_size).await?;

    let Some(Value::Array(items)) = body.ideas else {
        return Err(ApiError::BadRequest("ideas must be a list".to_string()));
    };

    let mut keys = Vec::with_capacity(items.len());
    let mut values = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let idea = parse_idea(Some(item), &format!("ideas[{index}]"))?;
        keys.push(idea_key(&user_id, &idea.id));
        values.push(serde_json::to_value(&idea).map_err(internal)?);
    }

    state.store.mset(&keys, &values).await?;

    tracing::info!(user_id = %user_id, count = keys.len(), "Ideas uploaded");
    Ok(Json(CountResponse {
        success: true,
        count: keys.len(),
    }))
}

/// PUT /ideas/{id} - Replace one idea.
///
/// A body without `id` takes the path id; a body with a different `id` is rejected.
pub async fn update_idea(
    State(state): State<AppState>,
    Path(idea_id): Path<String>,
    req: Request,
) -> ApiResult<Json<IdeaResponse>> {
    let user_id = require_auth(&req)?.user.id;
    let body: IdeaBody = read_json_body(req, state.config.server.max_body_size).await?;

    let value = match body.idea {
        Some(Value::Object(mut map)) => {
            if map.get("id").is_none_or(Value::is_null) {
                map.insert("id".to_string(), Value::String(idea_id.clone()));
            }
            Some(Value::Object(map))
        }
        other => other,
    };
    let idea = parse_idea(value, "idea")?;
    if idea.id != idea_id {
        return Err(ApiError::BadRequest(format!(
            "idea.id '{}' does not match path id '{idea_id}'",
            idea.id
        )));
    }

    state
        .store
        .set(&idea_key(&user_id, &idea_id), &serde_json::to_value(&idea).map_err(internal)?)
        .await?;

    tracing::debug!(user_id = %user_id, idea_id = %idea_id, "Idea replaced");
    Ok(Json(IdeaResponse {
        success: true,
        idea,
    }))
}

/// DELETE /ideas/{id} - Remove one idea. Removing an absent idea succeeds.
pub async fn delete_idea(
    State(state): State<AppState>,
    Path(idea_id): Path<String>,
    req: Request,
) -> ApiResult<Json<SuccessResponse>> {
    let user_id = require_auth(&req)?.user.id;
    state.store.del(&idea_key(&user_id, &idea_id)).await?;

    tracing::debug!(user_id = %user_id, idea_id = %idea_id, "Idea deleted");
    Ok(Json(SuccessResponse::ok()))
}

/// DELETE /ideas - Remove every idea owned by the caller.
pub async fn clear_ideas(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CountResponse>> {
    let user_id = require_auth(&req)?.user.id;
    let keys = state.store.keys_by_prefix(&user_prefix(&user_id)).await?;
    state.store.mdel(&keys).await?;

    tracing::info!(user_id = %user_id, count = keys.len(), "Ideas cleared");
    Ok(Json(CountResponse {
        success: true,
        count: keys.len(),
    }))
}

fn internal(e: serde_json::Error) -> ApiError {
    ApiError::Internal(format!("failed to encode idea: {e}"))
}
