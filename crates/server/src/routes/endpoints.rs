use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use db::{
    ids,
    models::{
        app::App,
        endpoint::{CreateEndpoint, Endpoint, MAX_HTTP_TIMEOUT_MS, UpdateEndpoint},
    },
};
use utils::response::{ApiResponse, FieldError};

use crate::{AppState, error::ApiError, routes::apps::validate_app_id};

pub async fn create_endpoint(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Json(payload): Json<CreateEndpoint>,
) -> Result<Json<ApiResponse<Endpoint>>, ApiError> {
    validate_app_id(&app_id)?;
    App::find_by_id(&state.db.pool, &app_id)
        .await?
        .ok_or(ApiError::NotFound("app_not_found"))?;
    validate_forwarding_config(payload.forward_url.as_deref(), payload.http_timeout_ms)?;

    let endpoint = Endpoint::create(&state.db.pool, &app_id, &payload).await?;
    tracing::info!(
        endpoint_id = %endpoint.id,
        app_id = %app_id,
        hook_token = %endpoint.hook_token,
        "created endpoint"
    );
    Ok(Json(ApiResponse::new("endpoint_created", endpoint)))
}

pub async fn list_endpoints(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Endpoint>>>, ApiError> {
    validate_app_id(&app_id)?;
    App::find_by_id(&state.db.pool, &app_id)
        .await?
        .ok_or(ApiError::NotFound("app_not_found"))?;
    let endpoints = Endpoint::list_by_app(&state.db.pool, &app_id).await?;
    Ok(Json(ApiResponse::new("endpoints_found", endpoints)))
}

pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
) -> Result<Json<ApiResponse<Endpoint>>, ApiError> {
    validate_endpoint_id(&endpoint_id)?;
    let endpoint = Endpoint::find_by_id(&state.db.pool, &endpoint_id)
        .await?
        .ok_or(ApiError::NotFound("endpoint_not_found"))?;
    Ok(Json(ApiResponse::new("endpoint_found", endpoint)))
}

/// Update forwarding configuration. The hook token is immutable and not part
/// of the update surface.
pub async fn update_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    Json(payload): Json<UpdateEndpoint>,
) -> Result<Json<ApiResponse<Endpoint>>, ApiError> {
    validate_endpoint_id(&endpoint_id)?;
    validate_forwarding_config(payload.forward_url.as_deref(), payload.http_timeout_ms)?;

    let endpoint = Endpoint::update(&state.db.pool, &endpoint_id, &payload)
        .await?
        .ok_or(ApiError::NotFound("endpoint_not_found"))?;
    tracing::info!(endpoint_id = %endpoint.id, "updated endpoint");
    Ok(Json(ApiResponse::new("endpoint_updated", endpoint)))
}

pub(crate) fn validate_endpoint_id(endpoint_id: &str) -> Result<(), ApiError> {
    if !ids::is_valid(endpoint_id, ids::ENDPOINT_PREFIX) {
        return Err(ApiError::validation(
            FieldError::new("endpoint_id", "invalid_id", "malformed endpoint id")
                .expected("end_ followed by 32 hex characters")
                .received(endpoint_id),
        ));
    }
    Ok(())
}

fn validate_forwarding_config(
    forward_url: Option<&str>,
    http_timeout_ms: Option<i64>,
) -> Result<(), ApiError> {
    let mut errors = Vec::new();

    // An empty forward URL means "not configured yet" and is allowed.
    if let Some(forward_url) = forward_url.filter(|u| !u.is_empty()) {
        match url::Url::parse(forward_url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
            Ok(_) => errors.push(
                FieldError::new("forward_url", "invalid_scheme", "must use http or https")
                    .received(forward_url),
            ),
            Err(_) => errors.push(
                FieldError::new("forward_url", "invalid_url", "not a valid URL")
                    .received(forward_url),
            ),
        }
    }

    if let Some(timeout) = http_timeout_ms {
        if timeout <= 0 {
            errors.push(
                FieldError::new("http_timeout_ms", "out_of_range", "must be positive")
                    .expected(format!("1..={MAX_HTTP_TIMEOUT_MS}"))
                    .received(timeout.to_string()),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/apps/{app_id}/endpoints",
            get(list_endpoints).post(create_endpoint),
        )
        .route(
            "/endpoints/{endpoint_id}",
            get(get_endpoint).patch(update_endpoint),
        )
}
