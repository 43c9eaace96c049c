use crate::{
    handlers,
    AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Largest accepted upload.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Creates the Axum router and associates routes with handlers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stories", post(handlers::create_story).get(handlers::list_stories))
        .route("/stories/rings", get(handlers::story_rings))
        .route("/stories/{id}", get(handlers::get_story))
        .route("/stories/{id}/views", post(handlers::mark_viewed))
        .route("/users/{author_id}/stories", get(handlers::author_stories))
        .route("/media/{*key}", get(handlers::get_media))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
