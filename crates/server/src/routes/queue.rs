use axum::{Json, Router, extract::State, routing::get};
use db::models::delivery_job::QueueCounts;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Current scheduler counts by job status.
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueCounts>>, ApiError> {
    let counts = state.scheduler.counts().await?;
    Ok(Json(ApiResponse::new("queue_stats", counts)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/queue/stats", get(queue_stats))
}
