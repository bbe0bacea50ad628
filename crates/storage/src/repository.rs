//! In-memory Repository Implementation

use crate::{EventStore, SafetyEvent, StorageError};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, info};

/// In-memory event repository
pub struct Repository {
    /// Event records
    events: Mutex<Vec<SafetyEvent>>,
    /// Max event records
    max_event_records: usize,
    /// Next event ID
    next_event_id: Mutex<i64>,
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self {
            events: Mutex::new(Vec::with_capacity(1000)),
            max_event_records: 10_000,
            next_event_id: Mutex::new(1),
        }
    }

    /// Insert an event record
    pub fn insert_event(&self, mut record: SafetyEvent) -> Result<i64, StorageError> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        let mut id = self
            .next_event_id
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        record.id = *id;
        *id += 1;

        // Enforce retention
        if events.len() >= self.max_event_records {
            events.remove(0);
        }

        let returned_id = record.id;
        events.push(record);
        debug!("Inserted event with ID {}", returned_id);

        Ok(returned_id)
    }

    /// Get events with an optional subject filter, newest first
    pub fn get_events(&self, subject_id: Option<&str>, limit: usize) -> Result<Vec<SafetyEvent>, StorageError> {
        let events = self
            .events
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        Ok(events
            .iter()
            .rev()
            .filter(|e| subject_id.map_or(true, |s| e.subject_id == s))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Get total event count
    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for Repository {
    async fn record_event(&self, event: SafetyEvent) -> Result<i64, StorageError> {
        self.insert_event(event)
    }

    async fn recent_events(&self, subject_id: &str, limit: usize) -> Result<Vec<SafetyEvent>, StorageError> {
        self.get_events(Some(subject_id), limit)
    }

    async fn count_events(&self, subject_id: &str) -> Result<usize, StorageError> {
        let events = self
            .events
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;
        Ok(events.iter().filter(|e| e.subject_id == subject_id).count())
    }
}
