pub mod apps;
pub mod deliveries;
pub mod endpoints;
pub mod events;
pub mod ingest;
pub mod queue;

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{any, get},
};
use utils::response::ApiResponse;

use crate::AppState;

async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::message("ok"))
}

async fn not_found() -> (StatusCode, Json<ApiResponse<serde_json::Value>>) {
    (StatusCode::NOT_FOUND, Json(ApiResponse::message("not_found")))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(apps::router())
        .merge(endpoints::router())
        .merge(events::router())
        .merge(deliveries::router())
        .merge(queue::router());

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        // The capture surface: any single-segment path is treated as a hook
        // token; the handler rejects anything that is not one.
        .route("/{hook_token}", any(ingest::capture))
        .fallback(not_found)
        .with_state(state)
}
