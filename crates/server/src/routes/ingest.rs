//! The capture path: `ANY /{hook_token}`.
//!
//! The request body reaches the event store as the exact bytes read from the
//! wire. Nothing parses or re-serializes it on the way in, and the capture is
//! bounded only by the configured byte cap.

use std::net::SocketAddr;

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Request, Uri},
};
use db::models::{
    endpoint::Endpoint,
    event::{CreateEvent, Event},
};
use serde_json::Value;
use tracing::warn;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Methods accepted on the capture URL. GET is intentionally allowed.
const ALLOWED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "PATCH"];

pub async fn capture(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(hook_token): Path<String>,
    request: Request<Body>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let method = request.method().as_str().to_uppercase();
    if !ALLOWED_METHODS.contains(&method.as_str()) {
        return Err(ApiError::MethodNotAllowed);
    }
    if !db::ids::is_hook_token(&hook_token) {
        return Err(ApiError::NotFound("endpoint_not_found"));
    }

    let endpoint = Endpoint::find_by_hook_token(&state.db.pool, &hook_token)
        .await?
        .ok_or(ApiError::NotFound("endpoint_not_found"))?;

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;

    let event = Event::create(
        &state.db.pool,
        &CreateEvent {
            endpoint_id: endpoint.id.clone(),
            method,
            original_url: reconstruct_original_url(&parts.headers, &parts.uri),
            source_url: derive_source_url(&parts.headers),
            path: parts.uri.path().to_string(),
            query: capture_query(parts.uri.query()),
            headers: capture_headers(&parts.headers),
            body: body.to_vec(),
            source_ip: client_ip(&parts.headers, peer),
            user_agent: header_first(&parts.headers, "user-agent"),
        },
    )
    .await?;

    // Fire-and-forget: the stored event is the durable source of truth, so a
    // scheduling failure must not fail the capture.
    if let Err(e) = state.scheduler.enqueue(&event.id, &endpoint.id).await {
        warn!(event_id = %event.id, error = %e, "failed to enqueue delivery job");
    }

    Ok(Json(ApiResponse::message("event_created")))
}

/// All request headers as a JSON object: lowercased name -> array of values.
fn capture_headers(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        if let Value::Array(values) = map
            .entry(name.as_str().to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            values.push(Value::String(value));
        }
    }
    Value::Object(map)
}

/// The query string as a JSON object; repeated keys become arrays.
fn capture_query(query: Option<&str>) -> Value {
    let mut map = serde_json::Map::new();
    let Some(query) = query else {
        return Value::Object(map);
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match map.get_mut(key.as_ref()) {
            None => {
                map.insert(key.into_owned(), Value::String(value.into_owned()));
            }
            Some(Value::String(existing)) => {
                let first = Value::String(std::mem::take(existing));
                map.insert(
                    key.into_owned(),
                    Value::Array(vec![first, Value::String(value.into_owned())]),
                );
            }
            Some(Value::Array(values)) => {
                values.push(Value::String(value.into_owned()));
            }
            Some(_) => {}
        }
    }
    Value::Object(map)
}

/// Rebuild the URL the producer addressed. Proxy headers win over the
/// connection's own view.
fn reconstruct_original_url(headers: &HeaderMap, uri: &Uri) -> String {
    let proto =
        forwarded_token(headers, "x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = forwarded_token(headers, "x-forwarded-host")
        .or_else(|| header_first(headers, "host"))
        .unwrap_or_else(|| "localhost".to_string());
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{proto}://{host}{path_and_query}")
}

/// Where the producer says it came from, if it says at all.
fn derive_source_url(headers: &HeaderMap) -> Option<String> {
    ["origin", "referer", "x-webhook-source"]
        .iter()
        .filter_map(|name| header_first(headers, name))
        .find(|value| !value.is_empty())
}

fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    forwarded_token(headers, "x-forwarded-for").unwrap_or_else(|| peer.ip().to_string())
}

/// First comma-separated token of a header, trimmed; None when empty.
fn forwarded_token(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = header_first(headers, name)?;
    let token = value.split(',').next()?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn header_first(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_allowed_methods() {
        for method in ["GET", "POST", "PUT", "PATCH"] {
            assert!(ALLOWED_METHODS.contains(&method));
        }
        for method in ["DELETE", "HEAD", "OPTIONS", "TRACE"] {
            assert!(!ALLOWED_METHODS.contains(&method));
        }
    }

    #[test]
    fn test_capture_headers_preserves_multi_values() {
        let map = headers(&[
            ("X-Custom", "a"),
            ("x-custom", "b"),
            ("Content-Type", "application/json"),
        ]);
        let captured = capture_headers(&map);
        assert_eq!(
            captured["x-custom"],
            serde_json::json!(["a", "b"]),
        );
        assert_eq!(
            captured["content-type"],
            serde_json::json!(["application/json"]),
        );
    }

    #[test]
    fn test_capture_query_single_and_repeated_keys() {
        let captured = capture_query(Some("a=1&b=2&a=3&empty="));
        assert_eq!(captured["a"], serde_json::json!(["1", "3"]));
        assert_eq!(captured["b"], serde_json::json!("2"));
        assert_eq!(captured["empty"], serde_json::json!(""));
        assert_eq!(capture_query(None), serde_json::json!({}));
    }

    #[test]
    fn test_reconstruct_original_url_prefers_proxy_headers() {
        let uri: Uri = "/deadbeefdeadbeefdeadbeef?a=1".parse().unwrap();

        let map = headers(&[
            ("host", "internal:3030"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "hooks.example.com, internal:3030"),
        ]);
        assert_eq!(
            reconstruct_original_url(&map, &uri),
            "https://hooks.example.com/deadbeefdeadbeefdeadbeef?a=1"
        );

        let map = headers(&[("host", "localhost:3030")]);
        assert_eq!(
            reconstruct_original_url(&map, &uri),
            "http://localhost:3030/deadbeefdeadbeefdeadbeef?a=1"
        );
    }

    #[test]
    fn test_derive_source_url_precedence() {
        let map = headers(&[
            ("referer", "https://ref.example"),
            ("origin", "https://origin.example"),
        ]);
        assert_eq!(
            derive_source_url(&map).as_deref(),
            Some("https://origin.example")
        );

        let map = headers(&[("x-webhook-source", "https://src.example")]);
        assert_eq!(
            derive_source_url(&map).as_deref(),
            Some("https://src.example")
        );

        assert_eq!(derive_source_url(&headers(&[])), None);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let peer: SocketAddr = "10.0.0.9:55000".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&map, peer), "203.0.113.7");
        assert_eq!(client_ip(&headers(&[]), peer), "10.0.0.9");
    }
}
