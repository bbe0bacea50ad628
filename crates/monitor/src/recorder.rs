//! Event Recorder
//!
//! Persists an emitted alert for the active driver: the annotated frame as
//! JPEG evidence plus one event record in the store.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use dms::landmarks::indices;
use dms::LandmarkSet;
use driver_session::SubjectProvider;
use image::{ImageFormat, Rgb};
use imageproc::drawing::draw_filled_circle_mut;
use storage::{EventStore, EventType, SafetyEvent};
use tracing::{debug, info};

use crate::MonitorError;

const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_RADIUS: i32 = 2;

/// Writes evidence images and event records
pub struct EventRecorder {
    records_dir: PathBuf,
    store: Arc<dyn EventStore>,
    subjects: Arc<dyn SubjectProvider>,
}

impl EventRecorder {
    pub fn new(
        records_dir: impl Into<PathBuf>,
        store: Arc<dyn EventStore>,
        subjects: Arc<dyn SubjectProvider>,
    ) -> Self {
        Self {
            records_dir: records_dir.into(),
            store,
            subjects,
        }
    }

    /// Record one event.
    ///
    /// Returns `Ok(None)` when no driver is active; nothing is written then.
    pub async fn record(
        &self,
        frame: &VideoFrame,
        landmarks: &LandmarkSet,
        event_type: EventType,
        at: DateTime<Local>,
    ) -> Result<Option<SafetyEvent>, MonitorError> {
        let Some(subject_id) = self.subjects.active_subject()? else {
            debug!("No active driver, {} event not recorded", event_type);
            return Ok(None);
        };
        validate_subject(&subject_id)?;

        let filename = evidence_filename(at, frame.sequence);
        let dir = self.records_dir.join(&subject_id);
        let path = dir.join(&filename);
        let (frame, landmarks) = (frame.clone(), landmarks.clone());
        tokio::task::spawn_blocking(move || write_evidence(&dir, &path, &frame, &landmarks))
            .await
            .map_err(|e| MonitorError::Evidence(format!("evidence writer failed: {}", e)))??;

        let image_path = relative_image_path(&self.records_dir, &subject_id, &filename);
        let mut event = SafetyEvent::new(
            subject_id,
            event_type,
            at.format("%Y-%m-%d %H:%M:%S").to_string(),
            image_path,
        );
        event.id = self.store.record_event(event.clone()).await?;

        info!(
            "Recorded {} event {} for driver {} ({})",
            event.event_type, event.id, event.subject_id, event.image_path
        );
        Ok(Some(event))
    }
}

/// Wall-clock second plus frame sequence, so replayed frames landing in the
/// same second keep separate files
fn evidence_filename(at: DateTime<Local>, sequence: u32) -> String {
    format!("event_{}_{:06}.jpg", at.timestamp(), sequence)
}

/// Annotate and write one JPEG, never replacing an existing file
fn write_evidence(dir: &Path, path: &Path, frame: &VideoFrame, landmarks: &LandmarkSet) -> Result<(), MonitorError> {
    fs::create_dir_all(dir)?;
    let evidence = annotate(frame, landmarks)?;

    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    evidence.write_to(&mut writer, ImageFormat::Jpeg)?;
    writer.flush()?;
    Ok(())
}

/// Frame with the eye and mouth landmarks marked
fn annotate(frame: &VideoFrame, landmarks: &LandmarkSet) -> Result<image::RgbImage, MonitorError> {
    let mut img = frame
        .to_rgb_image()
        .ok_or_else(|| MonitorError::Evidence("frame buffer does not match its dimensions".into()))?;

    let marked = indices::LEFT_EYE
        .iter()
        .chain(indices::RIGHT_EYE.iter())
        .chain(indices::MOUTH.iter());

    for &i in marked {
        if let Some((x, y)) = landmarks.point(i) {
            draw_filled_circle_mut(&mut img, (x as i32, y as i32), MARKER_RADIUS, MARKER_COLOR);
        }
    }

    Ok(img)
}

/// `/`-separated path as stored in the event table
fn relative_image_path(records_dir: &Path, subject_id: &str, filename: &str) -> String {
    let base = records_dir.to_string_lossy().replace('\\', "/");
    format!("{}/{}/{}", base.trim_end_matches('/'), subject_id, filename)
}

/// Driver ids become directory names
fn validate_subject(subject_id: &str) -> Result<(), MonitorError> {
    if subject_id.is_empty()
        || subject_id == "."
        || subject_id == ".."
        || subject_id.contains(['/', '\\'])
    {
        return Err(MonitorError::InvalidSubject(subject_id.to_string()));
    }
    Ok(())
}
