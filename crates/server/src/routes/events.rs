use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use db::{
    ids,
    models::event::Event,
};
use serde::{Deserialize, Serialize};
use utils::{
    projection::project_event_body,
    response::{ApiResponse, FieldError},
};

use crate::{AppState, error::ApiError, routes::endpoints::validate_endpoint_id};

const DEFAULT_LIST_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// An event as the read API presents it: stored bytes projected into JSON.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub method: String,
    pub original_url: String,
    pub source_url: Option<String>,
    pub path: String,
    pub query: serde_json::Value,
    pub headers: serde_json::Value,
    pub body: serde_json::Value,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub size_bytes: i64,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        let body = project_event_body(
            &event.body,
            event.header_first("content-type").as_deref(),
            event.header_first("content-encoding").as_deref(),
        );
        EventResponse {
            query: event.query_map(),
            headers: event.headers_map(),
            body,
            id: event.id,
            endpoint_id: event.endpoint_id,
            received_at: event.received_at,
            method: event.method,
            original_url: event.original_url,
            source_url: event.source_url,
            path: event.path,
            source_ip: event.source_ip,
            user_agent: event.user_agent,
            size_bytes: event.size_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<EventResponse>,
    pub has_next: bool,
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<EventListResponse>>, ApiError> {
    validate_endpoint_id(&endpoint_id)?;
    let page = Event::list_by_endpoint(
        &state.db.pool,
        &endpoint_id,
        query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        query.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(ApiResponse::new(
        "events_found",
        EventListResponse {
            events: page.items.into_iter().map(EventResponse::from).collect(),
            has_next: page.has_next,
        },
    )))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<ApiResponse<EventResponse>>, ApiError> {
    validate_event_id(&event_id)?;
    let event = Event::find_by_id(&state.db.pool, &event_id)
        .await?
        .ok_or(ApiError::NotFound("event_not_found"))?;
    Ok(Json(ApiResponse::new("event_found", EventResponse::from(event))))
}

pub(crate) fn validate_event_id(event_id: &str) -> Result<(), ApiError> {
    if !ids::is_valid(event_id, ids::EVENT_PREFIX) {
        return Err(ApiError::validation(
            FieldError::new("event_id", "invalid_id", "malformed event id")
                .expected("evt_ followed by 32 hex characters")
                .received(event_id),
        ));
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/endpoints/{endpoint_id}/events", get(list_events))
        .route("/events/{event_id}", get(get_event))
}
