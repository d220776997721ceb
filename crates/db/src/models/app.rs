use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::ids;

/// Batch size for streaming endpoint ids during cascade deletion.
const CASCADE_BATCH_SIZE: i64 = 1000;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateApp {
    pub name: String,
}

impl App {
    pub async fn create(pool: &SqlitePool, data: &CreateApp) -> Result<Self, sqlx::Error> {
        let id = ids::generate(ids::APP_PREFIX);
        let created_at = Utc::now();
        sqlx::query_as::<_, App>(
            "INSERT INTO apps (id, name, created_at)
             VALUES ($1, $2, $3)
             RETURNING id, name, created_at",
        )
        .bind(&id)
        .bind(&data.name)
        .bind(created_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, App>("SELECT id, name, created_at FROM apps WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete an app together with its endpoints and their events, in one
    /// transaction: app row first, then events per endpoint-id batch, then
    /// the endpoints. Deliveries referencing removed events are left for the
    /// retention sweep.
    ///
    /// Returns the number of app rows removed (0 when the app is unknown).
    pub async fn delete_cascade(pool: &SqlitePool, id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM apps WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        let mut offset = 0i64;
        loop {
            let batch: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM endpoints WHERE app_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            )
            .bind(id)
            .bind(CASCADE_BATCH_SIZE)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await?;
            if batch.is_empty() {
                break;
            }

            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!("DELETE FROM events WHERE endpoint_id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for endpoint_id in &batch {
                query = query.bind(endpoint_id);
            }
            query.execute(&mut *tx).await?;

            offset += batch.len() as i64;
        }

        sqlx::query("DELETE FROM endpoints WHERE app_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }
}
