//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use aquarium_core::config::CorsConfig;
use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post, put};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Every route is mounted under `server.api_prefix`.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated)
        .route("/health", get(handlers::health_check))
        // Accounts
        .route("/signup", post(handlers::signup))
        .route("/auth/token", post(handlers::issue_token))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/whoami", get(handlers::whoami))
        // Ideas
        .route(
            "/ideas",
            get(handlers::list_ideas)
                .post(handlers::create_idea)
                .delete(handlers::clear_ideas),
        )
        .route("/ideas/batch", post(handlers::upload_ideas))
        .route(
            "/ideas/{idea_id}",
            put(handlers::update_idea).delete(handlers::delete_idea),
        );

    let prefix = state.config.server.api_prefix.as_str();
    let router = if prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(prefix, api_routes)
    };

    // Auth middleware (verifies the credential and sets AuthenticatedUser)
    let mut router = router.layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    // Preflights are answered here, before they reach auth.
    if let Some(cors) = cors_layer(&state.config.server.cors) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.is_enabled() {
        return None;
    }

    let origin = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                CONTENT_TYPE,
                AUTHORIZATION,
                HeaderName::from_static("x-user-token"),
            ])
            .expose_headers([CONTENT_LENGTH])
            .max_age(Duration::from_secs(config.max_age_secs)),
    )
}
