//! Driver Session Module
//!
//! Tracks which driver is currently being monitored. The dashboard sets and
//! clears the active driver; the detection loop only reads it.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed session file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Source of the active driver id
pub trait SubjectProvider: Send + Sync {
    /// Currently monitored driver, if any
    fn active_subject(&self) -> Result<Option<String>, SessionError>;

    /// Begin monitoring `subject_id`
    fn set_active(&self, subject_id: &str) -> Result<(), SessionError>;

    /// End the current session
    fn clear(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    driver_id: Option<serde_json::Value>,
}

impl SessionFile {
    /// The dashboard writes numeric ids; accept strings too.
    ///
    /// A zero id is the dashboard's "nobody logged in" value, so numeric 0 is
    /// no active driver. The string `"0"` is a real id.
    fn subject_id(self) -> Option<String> {
        match self.driver_id? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Active driver stored as `{"driver_id": "..."}` in a JSON file.
///
/// Absence of the file means no active driver. The file is the cross-process
/// handoff between the dashboard and the detection process.
#[derive(Debug, Clone)]
pub struct FileSubjectProvider {
    path: PathBuf,
}

impl FileSubjectProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubjectProvider for FileSubjectProvider {
    fn active_subject(&self) -> Result<Option<String>, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: SessionFile = serde_json::from_str(&raw)?;
        Ok(file.subject_id())
    }

    fn set_active(&self, subject_id: &str) -> Result<(), SessionError> {
        let body = serde_json::to_string(&SessionFile {
            driver_id: Some(serde_json::Value::String(subject_id.to_string())),
        })?;

        // Write-then-rename so readers never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;

        info!("Active driver set to {}", subject_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Active driver cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No active driver to clear");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to clear active driver: {}", e);
                Err(e.into())
            }
        }
    }
}

/// Process-local active driver
#[derive(Debug, Default)]
pub struct InMemorySubjectProvider {
    current: RwLock<Option<String>>,
}

impl InMemorySubjectProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(subject_id: &str) -> Self {
        Self {
            current: RwLock::new(Some(subject_id.to_string())),
        }
    }
}

impl SubjectProvider for InMemorySubjectProvider {
    fn active_subject(&self) -> Result<Option<String>, SessionError> {
        self.current
            .read()
            .map(|c| c.clone())
            .map_err(|e| SessionError::Lock(e.to_string()))
    }

    fn set_active(&self, subject_id: &str) -> Result<(), SessionError> {
        let mut current = self.current.write().map_err(|e| SessionError::Lock(e.to_string()))?;
        *current = Some(subject_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        let mut current = self.current.write().map_err(|e| SessionError::Lock(e.to_string()))?;
        *current = None;
        Ok(())
    }
}
