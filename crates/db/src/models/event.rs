use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::Page;
use crate::ids;

/// Listing limit bounds for events.
pub const MIN_LIST_LIMIT: i64 = 1;
pub const MAX_LIST_LIMIT: i64 = 50;

const EVENT_COLUMNS: &str = "id, endpoint_id, received_at, method, original_url, source_url, \
     path, query, headers, body, source_ip, user_agent, size_bytes";

/// One captured inbound request, stored verbatim. Append-only: rows are
/// inserted once and never updated.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub original_url: String,
    pub source_url: Option<String>,
    /// JSON object: query key -> string or array of strings.
    pub query: String,
    /// JSON object: lowercased header name -> array of values.
    pub headers: String,
    pub path: String,
    /// The exact bytes received on the wire.
    #[serde(skip_serializing)]
    pub body: Vec<u8>,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug)]
pub struct CreateEvent {
    pub endpoint_id: String,
    pub method: String,
    pub original_url: String,
    pub source_url: Option<String>,
    pub path: String,
    pub query: serde_json::Value,
    pub headers: serde_json::Value,
    pub body: Vec<u8>,
    pub source_ip: String,
    pub user_agent: Option<String>,
}

impl Event {
    /// Headers as a JSON object; empty object when the stored text is
    /// malformed.
    pub fn headers_map(&self) -> serde_json::Value {
        serde_json::from_str(&self.headers).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// First value of a header, by lowercased name.
    pub fn header_first(&self, name: &str) -> Option<String> {
        self.headers_map()
            .get(name)?
            .as_array()?
            .first()?
            .as_str()
            .map(|s| s.to_string())
    }

    pub fn query_map(&self) -> serde_json::Value {
        serde_json::from_str(&self.query).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub async fn create(pool: &SqlitePool, data: &CreateEvent) -> Result<Self, sqlx::Error> {
        let id = ids::generate(ids::EVENT_PREFIX);
        let received_at = Utc::now();
        let size_bytes = data.body.len() as i64;
        sqlx::query_as::<_, Event>(&format!(
            "INSERT INTO events (id, endpoint_id, received_at, method, original_url, source_url, \
             path, query, headers, body, source_ip, user_agent, size_bytes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(&id)
        .bind(&data.endpoint_id)
        .bind(received_at)
        .bind(&data.method)
        .bind(&data.original_url)
        .bind(&data.source_url)
        .bind(&data.path)
        .bind(data.query.to_string())
        .bind(data.headers.to_string())
        .bind(&data.body)
        .bind(&data.source_ip)
        .bind(&data.user_agent)
        .bind(size_bytes)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Event>(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Newest first; ties on `received_at` break by descending rowid so
    /// pagination stays stable under bursts sharing a millisecond.
    pub async fn list_by_endpoint(
        pool: &SqlitePool,
        endpoint_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Self>, sqlx::Error> {
        let limit = limit.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT);
        let offset = offset.max(0);
        let rows = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE endpoint_id = $1
             ORDER BY received_at DESC, rowid DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(endpoint_id)
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

    fn sample(endpoint_id: &str, body: &[u8]) -> CreateEvent {
        CreateEvent {
            endpoint_id: endpoint_id.to_string(),
            method: "POST".to_string(),
            original_url: "http://localhost:3030/aaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            source_url: None,
            path: "/aaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            query: serde_json::json!({}),
            headers: serde_json::json!({"content-type": ["application/json"]}),
            body: body.to_vec(),
            source_ip: "127.0.0.1".to_string(),
            user_agent: Some("test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_preserves_bytes_and_size() {
        let db = DBService::new_in_memory().await.unwrap();
        let body = vec![0u8, 159, 146, 150, b'{', b'"'];
        let event = Event::create(&db.pool, &sample("end_x", &body)).await.unwrap();
        assert!(event.id.starts_with("evt_"));
        assert_eq!(event.body, body);
        assert_eq!(event.size_bytes, body.len() as i64);

        let loaded = Event::find_by_id(&db.pool, &event.id).await.unwrap().unwrap();
        assert_eq!(loaded.body, body);
        assert_eq!(loaded.header_first("content-type").as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_list_by_endpoint_newest_first_with_stable_ties() {
        let db = DBService::new_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..3 {
            let event = Event::create(&db.pool, &sample("end_a", format!("{i}").as_bytes()))
                .await
                .unwrap();
            ids.push(event.id);
        }
        Event::create(&db.pool, &sample("end_other", b"x")).await.unwrap();

        let page = Event::list_by_endpoint(&db.pool, "end_a", 2, 0).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next);
        // Same-millisecond inserts still come back newest-insert first.
        assert_eq!(page.items[0].id, ids[2]);
        assert_eq!(page.items[1].id, ids[1]);

        let page = Event::list_by_endpoint(&db.pool, "end_a", 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_next);
        assert_eq!(page.items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_list_clamps_limit_and_offset() {
        let db = DBService::new_in_memory().await.unwrap();
        Event::create(&db.pool, &sample("end_a", b"x")).await.unwrap();

        // limit below the minimum still returns one row
        let page = Event::list_by_endpoint(&db.pool, "end_a", 0, 0).await.unwrap();
        assert_eq!(page.items.len(), 1);

        // negative offset is treated as zero
        let page = Event::list_by_endpoint(&db.pool, "end_a", 10, -5).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
