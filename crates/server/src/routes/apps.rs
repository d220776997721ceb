use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use db::{
    ids,
    models::app::{App, CreateApp},
};
use serde::Deserialize;
use utils::response::{ApiResponse, FieldError};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
}

pub async fn create_app(
    State(state): State<AppState>,
    Json(payload): Json<CreateAppRequest>,
) -> Result<Json<ApiResponse<App>>, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation(
            FieldError::new("name", "required", "name must not be empty")
                .received(payload.name.as_str()),
        ));
    }

    let app = App::create(
        &state.db.pool,
        &CreateApp {
            name: name.to_string(),
        },
    )
    .await?;

    tracing::info!(app_id = %app.id, name = %app.name, "created app");
    Ok(Json(ApiResponse::new("app_created", app)))
}

pub async fn get_app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<ApiResponse<App>>, ApiError> {
    validate_app_id(&app_id)?;
    let app = App::find_by_id(&state.db.pool, &app_id)
        .await?
        .ok_or(ApiError::NotFound("app_not_found"))?;
    Ok(Json(ApiResponse::new("app_found", app)))
}

pub async fn delete_app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    validate_app_id(&app_id)?;
    let deleted = App::delete_cascade(&state.db.pool, &app_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("app_not_found"));
    }
    tracing::info!(app_id = %app_id, "deleted app and its endpoints and events");
    Ok(Json(ApiResponse::message("app_deleted")))
}

pub(crate) fn validate_app_id(app_id: &str) -> Result<(), ApiError> {
    if !ids::is_valid(app_id, ids::APP_PREFIX) {
        return Err(ApiError::validation(
            FieldError::new("app_id", "invalid_id", "malformed app id")
                .expected("app_ followed by 32 hex characters")
                .received(app_id),
        ));
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apps", post(create_app))
        .route("/apps/{app_id}", get(get_app).delete(delete_app))
}
