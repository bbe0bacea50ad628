//! Storage Layer
//!
//! Append-only safety event store with in-memory and SQLite repositories.

mod repository;
mod sqlite;

pub use repository::Repository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

/// Kind of safety event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Drowsiness,
    Yawning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Drowsiness => "drowsiness",
            EventType::Yawning => "yawning",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drowsiness" => Ok(EventType::Drowsiness),
            "yawning" => Ok(EventType::Yawning),
            other => Err(StorageError::InvalidRecord(format!("unknown event type {}", other))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded safety event; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    /// Assigned by the store
    pub id: i64,
    pub subject_id: String,
    pub event_type: EventType,
    /// Local wall time, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    /// Evidence image, relative to the working directory
    pub image_path: String,
}

impl SafetyEvent {
    pub fn new(
        subject_id: impl Into<String>,
        event_type: EventType,
        timestamp: impl Into<String>,
        image_path: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            subject_id: subject_id.into(),
            event_type,
            timestamp: timestamp.into(),
            image_path: image_path.into(),
        }
    }
}

/// Event sink used by the detection loop and read by the dashboard
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event; returns the assigned id
    async fn record_event(&self, event: SafetyEvent) -> Result<i64, StorageError>;

    /// Most recent events for a subject, newest first
    async fn recent_events(&self, subject_id: &str, limit: usize) -> Result<Vec<SafetyEvent>, StorageError>;

    /// Total number of events for a subject
    async fn count_events(&self, subject_id: &str) -> Result<usize, StorageError>;
}
