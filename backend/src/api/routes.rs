//! Route definitions for the API.

use axum::{extract::DefaultBodyLimit, middleware, routing::get, Json, Router};
use serde_json::{json, Value};

use super::handlers;
use super::middleware::context::request_context_middleware;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    // Build OpenAPI spec once at startup
    let openapi = super::openapi::build_openapi();

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/openapi.json",
            get(move || {
                let doc = openapi.clone();
                async move { Json(doc) }
            }),
        )
        .nest("/api/v1", api_v1_routes(&state))
        .layer(middleware::from_fn(request_context_middleware))
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes(state: &SharedState) -> Router<SharedState> {
    Router::new()
        .nest("/backup", handlers::backup::router())
        .nest("/export", handlers::export::router())
        .nest(
            "/import",
            handlers::import::router()
                .layer(DefaultBodyLimit::max(state.config.import_max_upload_bytes)),
        )
}

/// Liveness check
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
