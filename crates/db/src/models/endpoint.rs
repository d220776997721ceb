use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::ids;

/// Default outbound HTTP timeout in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: i64 = 10_000;
/// Upper bound for the outbound HTTP timeout.
pub const MAX_HTTP_TIMEOUT_MS: i64 = 120_000;

const ENDPOINT_COLUMNS: &str = "id, app_id, hook_token, forward_url, forwarding_enabled, \
     auth_header_name, auth_header_value, http_timeout_ms, is_active, created_at, updated_at";

/// Optional static header attached to every forwarded request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointAuth {
    pub header_name: String,
    pub header_value: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub app_id: String,
    /// Immutable once assigned; 24 lowercase hex chars, globally unique.
    pub hook_token: String,
    pub forward_url: String,
    pub forwarding_enabled: bool,
    pub auth_header_name: Option<String>,
    pub auth_header_value: Option<String>,
    pub http_timeout_ms: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateEndpoint {
    pub forward_url: Option<String>,
    pub forwarding_enabled: Option<bool>,
    pub authentication: Option<EndpointAuth>,
    pub http_timeout_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateEndpoint {
    pub forward_url: Option<String>,
    pub forwarding_enabled: Option<bool>,
    pub authentication: Option<EndpointAuth>,
    pub http_timeout_ms: Option<i64>,
    pub is_active: Option<bool>,
}

impl Endpoint {
    pub fn authentication(&self) -> Option<EndpointAuth> {
        match (&self.auth_header_name, &self.auth_header_value) {
            (Some(name), Some(value)) => Some(EndpointAuth {
                header_name: name.clone(),
                header_value: value.clone(),
            }),
            _ => None,
        }
    }

    pub async fn create(
        pool: &SqlitePool,
        app_id: &str,
        data: &CreateEndpoint,
    ) -> Result<Self, sqlx::Error> {
        let id = ids::generate(ids::ENDPOINT_PREFIX);
        let hook_token = ids::new_hook_token();
        let now = Utc::now();
        let timeout = data
            .http_timeout_ms
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)
            .min(MAX_HTTP_TIMEOUT_MS);
        let (auth_name, auth_value) = match &data.authentication {
            Some(auth) => (Some(&auth.header_name), Some(&auth.header_value)),
            None => (None, None),
        };
        sqlx::query_as::<_, Endpoint>(&format!(
            "INSERT INTO endpoints (id, app_id, hook_token, forward_url, forwarding_enabled, \
             auth_header_name, auth_header_value, http_timeout_ms, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10)
             RETURNING {ENDPOINT_COLUMNS}"
        ))
        .bind(&id)
        .bind(app_id)
        .bind(&hook_token)
        .bind(data.forward_url.as_deref().unwrap_or(""))
        .bind(data.forwarding_enabled.unwrap_or(true))
        .bind(auth_name)
        .bind(auth_value)
        .bind(timeout)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_hook_token(
        pool: &SqlitePool,
        hook_token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE hook_token = $1"
        ))
        .bind(hook_token)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_app(pool: &SqlitePool, app_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE app_id = $1 ORDER BY created_at DESC"
        ))
        .bind(app_id)
        .fetch_all(pool)
        .await
    }

    /// Update forwarding configuration. `hook_token` is never touched.
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        data: &UpdateEndpoint,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(existing) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };

        let forward_url = data.forward_url.as_ref().unwrap_or(&existing.forward_url);
        let forwarding_enabled = data
            .forwarding_enabled
            .unwrap_or(existing.forwarding_enabled);
        let is_active = data.is_active.unwrap_or(existing.is_active);
        let timeout = data
            .http_timeout_ms
            .unwrap_or(existing.http_timeout_ms)
            .min(MAX_HTTP_TIMEOUT_MS);
        let (auth_name, auth_value) = match &data.authentication {
            Some(auth) => (
                Some(auth.header_name.clone()),
                Some(auth.header_value.clone()),
            ),
            None => (
                existing.auth_header_name.clone(),
                existing.auth_header_value.clone(),
            ),
        };

        sqlx::query_as::<_, Endpoint>(&format!(
            "UPDATE endpoints
             SET forward_url = $2, forwarding_enabled = $3, auth_header_name = $4,
                 auth_header_value = $5, http_timeout_ms = $6, is_active = $7, updated_at = $8
             WHERE id = $1
             RETURNING {ENDPOINT_COLUMNS}"
        ))
        .bind(id)
        .bind(forward_url)
        .bind(forwarding_enabled)
        .bind(auth_name)
        .bind(auth_value)
        .bind(timeout)
        .bind(is_active)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }
}
