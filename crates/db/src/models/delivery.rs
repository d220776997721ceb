use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};

use super::Page;
use crate::ids;

/// Listing limit bounds for deliveries.
pub const MIN_LIST_LIMIT: i64 = 1;
pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_LIST_LIMIT: i64 = 20;

const DELIVERY_COLUMNS: &str = "id, event_id, parent_delivery_id, status, destination_url, \
     response_status, response_headers, response_body, duration_ms, error_message, created_at";

/// Outcome of one forwarding attempt.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Timeout,
}

/// One forwarding attempt and its outcome. Append-only; attempts for one
/// event chain through `parent_delivery_id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Delivery {
    pub id: String,
    pub event_id: String,
    pub parent_delivery_id: Option<String>,
    pub status: DeliveryStatus,
    /// Snapshot of the endpoint's `forward_url` at attempt time.
    pub destination_url: String,
    pub response_status: Option<i64>,
    /// JSON object: lowercased header name -> array of values.
    pub response_headers: Option<String>,
    #[serde(skip_serializing)]
    pub response_body: Option<Vec<u8>>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CreateDelivery {
    pub event_id: String,
    pub parent_delivery_id: Option<String>,
    pub status: DeliveryStatus,
    pub destination_url: String,
    pub response_status: Option<i64>,
    pub response_headers: Option<String>,
    pub response_body: Option<Vec<u8>>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl Delivery {
    /// Insert a new attempt. `(event_id, parent_delivery_id)` is unique, so
    /// a concurrent duplicate insert fails with a unique violation.
    pub async fn create(pool: &SqlitePool, data: &CreateDelivery) -> Result<Self, sqlx::Error> {
        let id = ids::generate(ids::DELIVERY_PREFIX);
        let created_at = Utc::now();
        sqlx::query_as::<_, Delivery>(&format!(
            "INSERT INTO deliveries (id, event_id, parent_delivery_id, status, destination_url, \
             response_status, response_headers, response_body, duration_ms, error_message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(&id)
        .bind(&data.event_id)
        .bind(&data.parent_delivery_id)
        .bind(data.status)
        .bind(&data.destination_url)
        .bind(data.response_status)
        .bind(&data.response_headers)
        .bind(&data.response_body)
        .bind(data.duration_ms)
        .bind(&data.error_message)
        .bind(created_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_event(
        pool: &SqlitePool,
        event_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Self>, sqlx::Error> {
        let limit = limit.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT);
        let offset = offset.max(0);
        let rows = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
             WHERE event_id = $1
             ORDER BY created_at DESC, rowid DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(event_id)
        .bind(limit + 1)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(Page::from_overfetch(rows, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn attempt(event_id: &str, parent: Option<&str>) -> CreateDelivery {
        CreateDelivery {
            event_id: event_id.to_string(),
            parent_delivery_id: parent.map(|p| p.to_string()),
            status: DeliveryStatus::Failed,
            destination_url: "http://dest.example/hook".to_string(),
            response_status: Some(500),
            response_headers: None,
            response_body: Some(b"oops".to_vec()),
            duration_ms: 12,
            error_message: Some("destination responded with status 500".to_string()),
        }
    }

    #[tokio::test]
    async fn test_event_parent_pair_is_unique() {
        let db = DBService::new_in_memory().await.unwrap();
        let first = Delivery::create(&db.pool, &attempt("evt_1", None)).await.unwrap();
        assert!(first.id.starts_with("dlv_"));

        // A second root attempt for the same event must fail.
        let err = Delivery::create(&db.pool, &attempt("evt_1", None))
            .await
            .unwrap_err();
        assert!(
            err.as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false)
        );

        // Chaining off the first attempt is fine, once.
        Delivery::create(&db.pool, &attempt("evt_1", Some(&first.id)))
            .await
            .unwrap();
        let err = Delivery::create(&db.pool, &attempt("evt_1", Some(&first.id)))
            .await
            .unwrap_err();
        assert!(
            err.as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false)
        );
    }

    #[tokio::test]
    async fn test_list_by_event_newest_first() {
        let db = DBService::new_in_memory().await.unwrap();
        let first = Delivery::create(&db.pool, &attempt("evt_2", None)).await.unwrap();
        let second = Delivery::create(&db.pool, &attempt("evt_2", Some(&first.id)))
            .await
            .unwrap();

        let page = Delivery::list_by_event(&db.pool, "evt_2", DEFAULT_LIST_LIMIT, 0)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_next);
        assert_eq!(page.items[0].id, second.id);
        assert_eq!(page.items[1].id, first.id);
        assert_eq!(page.items[0].parent_delivery_id.as_deref(), Some(first.id.as_str()));
    }
}
