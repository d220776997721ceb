use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use services::services::scheduler::ScheduleError;
use utils::response::FieldError;

/// Errors surfaced by the HTTP layer. Everything maps onto the response
/// envelope; internal failures never leak their details.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error")]
    Validation(Vec<FieldError>),

    /// The payload carries the response `message`, e.g. "endpoint_not_found".
    #[error("{0}")]
    NotFound(&'static str),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl ApiError {
    pub fn validation(error: FieldError) -> Self {
        Self::Validation(vec![error])
    }
}

fn envelope(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message, "data": null }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "validation_error", "errors": errors })),
            )
                .into_response(),
            ApiError::NotFound(message) => envelope(StatusCode::NOT_FOUND, message),
            ApiError::MethodNotAllowed => {
                envelope(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed")
            }
            ApiError::PayloadTooLarge => {
                envelope(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
            }
            ApiError::Schedule(ScheduleError::DeliveryNotFound(id)) => {
                tracing::debug!(delivery_id = %id, "retry requested for unknown delivery");
                envelope(StatusCode::NOT_FOUND, "delivery_not_found")
            }
            ApiError::Schedule(ScheduleError::EventNotFound(id)) => {
                tracing::debug!(event_id = %id, "retry requested for delivery of unknown event");
                envelope(StatusCode::NOT_FOUND, "event_not_found")
            }
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an error occured, please try again later.",
                )
            }
            ApiError::Schedule(ScheduleError::Database(e)) => {
                tracing::error!(error = %e, "database error while scheduling");
                envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an error occured, please try again later.",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::MethodNotAllowed.into_response().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::PayloadTooLarge.into_response().status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::NotFound("endpoint_not_found").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::validation(FieldError::new("name", "required", "missing"))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
