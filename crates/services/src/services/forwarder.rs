//! Outbound forwarding: header construction, self-forward guard, HTTP
//! execution, and outcome classification.

use std::time::{Duration, Instant};

use chrono::Utc;
use db::models::{delivery::DeliveryStatus, endpoint::Endpoint, event::Event};
use regex::Regex;
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing::{debug, warn};
use url::Url;

/// Request headers copied verbatim from the captured event. Everything else
/// is dropped; multi-value headers collapse to their first value.
const FORWARDED_HEADER_ALLOWLIST: [&str; 4] =
    ["content-type", "content-encoding", "accept", "user-agent"];

const FORWARDED_MARKER_HEADER: &str = "x-hookfreight-forwarded";
const FORWARDED_TIMESTAMP_HEADER: &str = "x-hookfreight-timestamp";

/// Error recorded when an endpoint forwards back into the relay itself.
pub const SELF_FORWARD_ERROR: &str = "forward URL points to a HookFreight webhook URL";

/// What one forwarding attempt produced.
#[derive(Debug)]
pub struct ForwardOutcome {
    pub status: DeliveryStatus,
    pub response_status: Option<u16>,
    pub response_headers: Option<String>,
    pub response_body: Option<Vec<u8>>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub retryable: bool,
}

impl ForwardOutcome {
    /// A failure that never reached the wire (bad config, guard refusal).
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            response_status: None,
            response_headers: None,
            response_body: None,
            duration_ms: 0,
            error_message: Some(message.into()),
            retryable: false,
        }
    }
}

pub struct ForwardService {
    client: Client,
    base_url: Url,
    hook_path: Regex,
}

impl ForwardService {
    /// `base_url` is the relay's public base URL, used by the self-forward
    /// guard.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");
        let hook_path = Regex::new(r"^/[A-Fa-f0-9]{24}$").expect("hook path pattern is valid");
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            hook_path,
        })
    }

    /// True when `target` points back at this relay's own ingest surface:
    /// same host:port (default port inferred from the scheme) and a path
    /// shaped like a hook token.
    pub fn is_self_forward(&self, target: &Url) -> bool {
        host_port(target) == host_port(&self.base_url) && self.hook_path.is_match(target.path())
    }

    /// Classify a received response status. Returns the delivery status and
    /// whether the failure is worth retrying.
    pub fn classify(status_code: u16) -> (DeliveryStatus, bool) {
        match status_code {
            200..=299 => (DeliveryStatus::Delivered, false),
            400..=499 => (DeliveryStatus::Failed, false),
            500..=u16::MAX => (DeliveryStatus::Failed, true),
            // 1xx/3xx: a response arrived but the destination is
            // misconfigured; retrying will not change it.
            _ => (DeliveryStatus::Failed, false),
        }
    }

    /// Build the outbound header set for an attempt.
    pub fn build_headers(event: &Event, endpoint: &Endpoint) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADER_ALLOWLIST {
            if let Some(value) = event.header_first(name) {
                insert_header(&mut headers, name, &value);
            }
        }
        insert_header(&mut headers, FORWARDED_MARKER_HEADER, "true");
        insert_header(
            &mut headers,
            FORWARDED_TIMESTAMP_HEADER,
            &Utc::now().to_rfc3339(),
        );
        // Endpoint authentication goes last so it overrides anything copied.
        if let Some(auth) = endpoint.authentication() {
            insert_header(
                &mut headers,
                &auth.header_name.to_ascii_lowercase(),
                &auth.header_value,
            );
        }
        headers
    }

    /// Execute one forwarding attempt: original method, original body bytes,
    /// per-endpoint timeout. Non-2xx responses are outcomes, not errors.
    pub async fn forward(&self, event: &Event, endpoint: &Endpoint) -> ForwardOutcome {
        let target = match Url::parse(&endpoint.forward_url) {
            Ok(url) => url,
            Err(e) => return ForwardOutcome::refused(format!("invalid forward URL: {e}")),
        };
        if self.is_self_forward(&target) {
            warn!(endpoint_id = %endpoint.id, url = %endpoint.forward_url, "refusing self-forward");
            return ForwardOutcome::refused(SELF_FORWARD_ERROR);
        }
        let method = match Method::from_bytes(event.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ForwardOutcome::refused(format!("invalid event method: {}", event.method));
            }
        };

        let timeout = Duration::from_millis(endpoint.http_timeout_ms.max(1) as u64);
        let headers = Self::build_headers(event, endpoint);

        debug!(
            event_id = %event.id,
            endpoint_id = %endpoint.id,
            url = %endpoint.forward_url,
            "forwarding event"
        );

        let start = Instant::now();
        let response = self
            .client
            .request(method, target)
            .headers(headers)
            .body(event.body.clone())
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let response_headers = headers_to_json(response.headers());
                let body = response.bytes().await;
                let duration_ms = start.elapsed().as_millis() as u64;
                let body = match body {
                    Ok(bytes) => bytes.to_vec(),
                    Err(e) => return transport_outcome(e, duration_ms, timeout),
                };
                let (status, retryable) = Self::classify(status_code);
                let error_message = (status != DeliveryStatus::Delivered)
                    .then(|| format!("destination responded with status {status_code}"));
                ForwardOutcome {
                    status,
                    response_status: Some(status_code),
                    response_headers: Some(response_headers),
                    response_body: Some(body),
                    duration_ms,
                    error_message,
                    retryable,
                }
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                transport_outcome(e, duration_ms, timeout)
            }
        }
    }
}

/// A request that never produced a usable response: timeout or transport
/// failure. Both are retryable.
fn transport_outcome(error: reqwest::Error, duration_ms: u64, timeout: Duration) -> ForwardOutcome {
    if error.is_timeout() {
        ForwardOutcome {
            status: DeliveryStatus::Timeout,
            response_status: None,
            response_headers: None,
            response_body: None,
            duration_ms,
            error_message: Some(format!("request timed out after {}ms", timeout.as_millis())),
            retryable: true,
        }
    } else {
        ForwardOutcome {
            status: DeliveryStatus::Failed,
            response_status: None,
            response_headers: None,
            response_body: None,
            duration_ms,
            error_message: Some(error.to_string()),
            retryable: true,
        }
    }
}

fn host_port(url: &Url) -> Option<(String, u16)> {
    let host = url.host_str()?.to_ascii_lowercase();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(header = name, "skipping unrepresentable outbound header"),
    }
}

/// Response headers as a JSON object: lowercased name -> array of values.
fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map
            .entry(name.as_str().to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()))
        {
            serde_json::Value::Array(values) => values.push(serde_json::Value::String(value)),
            _ => {}
        }
    }
    serde_json::Value::Object(map).to_string()
}
