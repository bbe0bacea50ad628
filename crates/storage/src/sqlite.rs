//! SQLite Repository Implementation

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::{EventStore, EventType, SafetyEvent, StorageError};

const CREATE_EVENTS: &str = "CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    driver_id TEXT,
    event_type TEXT,
    ts TEXT,
    image_path TEXT
)";

/// Event repository backed by the dashboard's SQLite database
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if missing) the database at `db_path`
    pub async fn open(db_path: &str) -> Result<Self, StorageError> {
        info!("Opening event database {}", db_path);
        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_EVENTS).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<SafetyEvent, StorageError> {
        let event_type: String = row.try_get("event_type")?;
        Ok(SafetyEvent {
            id: row.try_get("id")?,
            subject_id: row.try_get("driver_id")?,
            event_type: EventType::from_str(&event_type)?,
            timestamp: row.try_get("ts")?,
            image_path: row.try_get("image_path")?,
        })
    }
}

#[async_trait]
impl EventStore for SqliteRepository {
    async fn record_event(&self, event: SafetyEvent) -> Result<i64, StorageError> {
        let id = sqlx::query("INSERT INTO events(driver_id, event_type, ts, image_path) VALUES (?, ?, ?, ?)")
            .bind(&event.subject_id)
            .bind(event.event_type.as_str())
            .bind(&event.timestamp)
            .bind(&event.image_path)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        debug!("Inserted {} event {} for {}", event.event_type, id, event.subject_id);
        Ok(id)
    }

    async fn recent_events(&self, subject_id: &str, limit: usize) -> Result<Vec<SafetyEvent>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, driver_id, event_type, ts, image_path FROM events WHERE driver_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(subject_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn count_events(&self, subject_id: &str) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE driver_id = ?")
            .bind(subject_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let repo = SqliteRepository::in_memory().await.unwrap();

        let id = repo
            .record_event(SafetyEvent::new(
                "D1",
                EventType::Drowsiness,
                "2024-03-01 08:15:00",
                "records/D1/event_1709280900.jpg",
            ))
            .await
            .unwrap();
        repo.record_event(SafetyEvent::new("D1", EventType::Yawning, "2024-03-01 08:15:20", "records/D1/b.jpg"))
            .await
            .unwrap();

        let events = repo.recent_events("D1", 50).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Yawning);
        assert_eq!(events[1].id, id);
        assert_eq!(events[1].image_path, "records/D1/event_1709280900.jpg");
        assert_eq!(repo.count_events("D1").await.unwrap(), 2);
        assert_eq!(repo.count_events("D2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("drivers.db").display());

        {
            let repo = SqliteRepository::open(&url).await.unwrap();
            repo.record_event(SafetyEvent::new("D7", EventType::Yawning, "ts", "img.jpg"))
                .await
                .unwrap();
        }

        let repo = SqliteRepository::open(&url).await.unwrap();
        assert_eq!(repo.count_events("D7").await.unwrap(), 1);
    }
}
