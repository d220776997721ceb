use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use db::{
    ids,
    models::delivery::{DEFAULT_LIST_LIMIT, Delivery, DeliveryStatus},
};
use serde::Serialize;
use utils::{
    projection::project_response_body,
    response::{ApiResponse, FieldError},
};

use crate::{
    AppState,
    error::ApiError,
    routes::events::{ListQuery, validate_event_id},
};

/// A delivery attempt as the read API presents it: the stored response body
/// is projected into JSON best-effort.
#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub id: String,
    pub event_id: String,
    pub parent_delivery_id: Option<String>,
    pub status: DeliveryStatus,
    pub destination_url: String,
    pub response_status: Option<i64>,
    pub response_headers: Option<serde_json::Value>,
    pub response_body: serde_json::Value,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        DeliveryResponse {
            response_headers: delivery
                .response_headers
                .as_deref()
                .and_then(|h| serde_json::from_str(h).ok()),
            response_body: project_response_body(delivery.response_body.as_deref()),
            id: delivery.id,
            event_id: delivery.event_id,
            parent_delivery_id: delivery.parent_delivery_id,
            status: delivery.status,
            destination_url: delivery.destination_url,
            response_status: delivery.response_status,
            duration_ms: delivery.duration_ms,
            error_message: delivery.error_message,
            created_at: delivery.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryListResponse {
    pub deliveries: Vec<DeliveryResponse>,
    pub has_next: bool,
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<DeliveryListResponse>>, ApiError> {
    validate_event_id(&event_id)?;
    let page = Delivery::list_by_event(
        &state.db.pool,
        &event_id,
        query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        query.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(ApiResponse::new(
        "deliveries_found",
        DeliveryListResponse {
            deliveries: page.items.into_iter().map(DeliveryResponse::from).collect(),
            has_next: page.has_next,
        },
    )))
}

/// Manual replay: schedule a fresh attempt chained to an existing delivery.
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if !ids::is_valid(&delivery_id, ids::DELIVERY_PREFIX) {
        return Err(ApiError::validation(
            FieldError::new("delivery_id", "invalid_id", "malformed delivery id")
                .expected("dlv_ followed by 32 hex characters")
                .received(delivery_id.as_str()),
        ));
    }
    let job_id = state.scheduler.enqueue_retry(&delivery_id).await?;
    Ok(Json(ApiResponse::new(
        "delivery_retry_scheduled",
        serde_json::json!({ "job_id": job_id }),
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events/{event_id}/deliveries", get(list_deliveries))
        .route("/deliveries/{delivery_id}/retry", post(retry_delivery))
}
