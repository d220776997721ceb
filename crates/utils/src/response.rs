//! Response envelope shared by every API surface.
//!
//! Success responses are `{"message": <string>, "data": <value-or-null>}`.
//! Validation failures carry a per-field error list instead of `data`.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<serde_json::Value> {
    /// An envelope with `data: null`.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

/// One entry in the `errors` array of a `validation_error` response.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
            expected: None,
            received: None,
        }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let response = ApiResponse::new("app_created", serde_json::json!({"id": "app_1"}));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["message"], "app_created");
        assert_eq!(json["data"]["id"], "app_1");
    }

    #[test]
    fn test_message_only_envelope_keeps_null_data() {
        let response = ApiResponse::message("event_created");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"message":"event_created","data":null}"#);
    }

    #[test]
    fn test_field_error_optional_fields_are_omitted() {
        let err = FieldError::new("name", "required", "name must not be empty");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("expected").is_none());
        assert!(json.get("received").is_none());

        let err = FieldError::new("http_timeout_ms", "out_of_range", "must be positive")
            .expected("1..=120000")
            .received("0");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["expected"], "1..=120000");
        assert_eq!(json["received"], "0");
    }
}
