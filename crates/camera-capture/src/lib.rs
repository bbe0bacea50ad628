//! Camera Capture Library for the Drowsiness Monitor
//!
//! Provides the frame source contract consumed by the detection loop:
//! - Lazy, in principle infinite sequence of fixed-size RGB frames
//! - Finite only on capture failure or explicit close
//! - Not restartable once closed
//!
//! Two sources implement it: a live capture device (behind the `opencv`
//! feature) and a replayed directory of images.

#[cfg(feature = "opencv")]
pub mod device;
pub mod frame;
pub mod sequence;

#[cfg(feature = "opencv")]
pub use device::DeviceCamera;
pub use frame::{CropRegion, VideoFrame};
pub use sequence::ImageSequenceCamera;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Camera closed")]
    Closed,
}

/// Source of video frames.
///
/// `read_frame` blocks until the next frame is available. Any error is final:
/// the caller must stop reading and release the source.
pub trait CameraSource: Send {
    /// Read the next frame
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError>;

    /// Release the underlying device. Further reads return [`CameraError::Closed`].
    fn close(&mut self);

    /// Frame dimensions (width, height)
    fn dimensions(&self) -> (u32, u32);
}

/// Which frame source to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live capture device
    Device,
    /// Directory of still images
    Sequence,
}

impl Default for SourceKind {
    fn default() -> Self {
        if cfg!(feature = "opencv") {
            SourceKind::Device
        } else {
            SourceKind::Sequence
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: SourceKind,
    /// Capture device index (`source = "device"`)
    pub device_index: i32,
    /// Requested capture size; the device default when unset
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Directory of frames to replay (`source = "sequence"`)
    pub source_dir: String,
    /// Target FPS, used to stamp and pace replayed frames
    pub fps: u32,
    /// Deliver replayed frames at `fps` instead of as fast as they decode
    pub realtime: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device_index: 0,
            width: None,
            height: None,
            source_dir: "frames".to_string(),
            fps: 15,
            realtime: true,
        }
    }
}

/// Open the source selected by `config.source`
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn CameraSource>, CameraError> {
    match config.source {
        SourceKind::Sequence => {
            info!("Replaying frames from {}", Path::new(&config.source_dir).display());
            Ok(Box::new(ImageSequenceCamera::open(config)?))
        }
        #[cfg(feature = "opencv")]
        SourceKind::Device => Ok(Box::new(DeviceCamera::open(config)?)),
        #[cfg(not(feature = "opencv"))]
        SourceKind::Device => Err(CameraError::Open(
            "capture devices need the `opencv` feature; use source = \"sequence\"".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_camera_selects_sequence() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(4, 4).save(dir.path().join("frame_000.png")).unwrap();

        let config = CameraConfig {
            source: SourceKind::Sequence,
            source_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let mut camera = open_camera(&config).unwrap();
        assert_eq!(camera.dimensions(), (4, 4));
        assert_eq!(camera.read_frame().unwrap().sequence, 0);
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_device_without_backend_fails_to_open() {
        assert_eq!(SourceKind::default(), SourceKind::Sequence);
        let config = CameraConfig {
            source: SourceKind::Device,
            ..Default::default()
        };
        assert!(matches!(open_camera(&config), Err(CameraError::Open(_))));
    }

    #[test]
    fn test_source_kind_names() {
        let kind: SourceKind = serde_json::from_str("\"device\"").unwrap();
        assert_eq!(kind, SourceKind::Device);
        let kind: SourceKind = serde_json::from_str("\"sequence\"").unwrap();
        assert_eq!(kind, SourceKind::Sequence);
    }
}
