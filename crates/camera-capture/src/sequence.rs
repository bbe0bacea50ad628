//! Image-sequence camera
//!
//! Replays a directory of still images as a camera stream. Frames are stamped
//! at the configured rate so downstream timing behaves as it would live, and
//! with pacing on they are also delivered at that rate.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{CameraConfig, CameraError, CameraSource, VideoFrame};

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Camera backed by a sorted list of image files
pub struct ImageSequenceCamera {
    files: Vec<PathBuf>,
    next: usize,
    frame_interval_ns: u64,
    dimensions: (u32, u32),
    open: bool,
    paced: bool,
    started: Option<Instant>,
}

impl ImageSequenceCamera {
    /// Open a directory of images
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        Ok(Self::from_dir(Path::new(&config.source_dir), config.fps)?.with_pacing(config.realtime))
    }

    /// Deliver frame `n` no earlier than `n / fps` after the first read
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn wait_for_slot(&mut self) {
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_nanos(self.next as u64 * self.frame_interval_ns);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }

    pub fn from_dir(dir: &Path, fps: u32) -> Result<Self, CameraError> {
        if fps == 0 {
            return Err(CameraError::Format("fps must be positive".into()));
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let first = files
            .first()
            .ok_or_else(|| CameraError::Open(format!("no images in {}", dir.display())))?;
        let dimensions = image::image_dimensions(first)
            .map_err(|e| CameraError::Format(format!("{}: {}", first.display(), e)))?;

        info!(
            "Opened image sequence {} ({} frames, {}x{} @ {} fps)",
            dir.display(),
            files.len(),
            dimensions.0,
            dimensions.1,
            fps
        );

        Ok(Self {
            files,
            next: 0,
            frame_interval_ns: 1_000_000_000 / fps as u64,
            dimensions,
            open: true,
            paced: false,
            started: None,
        })
    }
}

impl CameraSource for ImageSequenceCamera {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if !self.open {
            return Err(CameraError::Closed);
        }

        if self.paced && self.next < self.files.len() {
            self.wait_for_slot();
        }

        let Some(path) = self.files.get(self.next) else {
            debug!("Image sequence exhausted after {} frames", self.next);
            self.open = false;
            return Err(CameraError::Closed);
        };

        let img = image::open(path)
            .map_err(|e| CameraError::Capture(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        if img.dimensions() != self.dimensions {
            warn!(
                "Frame {} is {:?}, expected {:?}",
                path.display(),
                img.dimensions(),
                self.dimensions
            );
            return Err(CameraError::Format(format!(
                "frame size changed mid-stream: {}",
                path.display()
            )));
        }

        let sequence = self.next as u32;
        let timestamp_ns = self.next as u64 * self.frame_interval_ns;
        self.next += 1;

        Ok(VideoFrame::from_image(img, timestamp_ns, sequence))
    }

    fn close(&mut self) {
        if self.open {
            info!("Closing image sequence camera");
        }
        self.open = false;
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }
}
