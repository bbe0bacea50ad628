//! Live capture device
//!
//! OpenCV `VideoCapture` on a device index. Frames come out of the driver as
//! BGR and are converted to RGB before they leave this module.

use std::time::Instant;

use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::{imgproc, videoio};
use tracing::{info, warn};

use crate::{CameraConfig, CameraError, CameraSource, VideoFrame};

/// Camera backed by an OpenCV capture device
pub struct DeviceCamera {
    capture: videoio::VideoCapture,
    index: i32,
    dimensions: (u32, u32),
    started: Instant,
    sequence: u32,
    open: bool,
}

impl DeviceCamera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let index = config.device_index;
        let mut capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| CameraError::Open(format!("device {}: {}", index, e)))?;

        let opened = capture
            .is_opened()
            .map_err(|e| CameraError::Open(format!("device {}: {}", index, e)))?;
        if !opened {
            return Err(CameraError::Open(format!("unable to open capture device {}", index)));
        }

        for (prop, value) in [
            (videoio::CAP_PROP_FRAME_WIDTH, config.width),
            (videoio::CAP_PROP_FRAME_HEIGHT, config.height),
        ] {
            if let Some(value) = value {
                if !capture.set(prop, value as f64).unwrap_or(false) {
                    warn!("Device {} ignored capture property {} = {}", index, prop, value);
                }
            }
        }
        if capture.set(videoio::CAP_PROP_FPS, config.fps as f64).is_err() {
            warn!("Device {} rejected {} fps", index, config.fps);
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0) as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0) as u32;
        if width == 0 || height == 0 {
            return Err(CameraError::Format(format!("device {} reports no frame size", index)));
        }

        info!("Opened capture device {} ({}x{})", index, width, height);

        Ok(Self {
            capture,
            index,
            dimensions: (width, height),
            started: Instant::now(),
            sequence: 0,
            open: true,
        })
    }
}

impl CameraSource for DeviceCamera {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if !self.open {
            return Err(CameraError::Closed);
        }

        let mut bgr = Mat::default();
        let grabbed = self
            .capture
            .read(&mut bgr)
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        let size = bgr.size().map_err(|e| CameraError::Capture(e.to_string()))?;
        if !grabbed || size.width == 0 {
            return Err(CameraError::Capture(format!("device {} returned no frame", self.index)));
        }

        let (width, height) = self.dimensions;
        if size != Size::new(width as i32, height as i32) {
            return Err(CameraError::Format(format!(
                "frame size changed to {}x{}",
                size.width, size.height
            )));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| CameraError::Format(e.to_string()))?;
        let data = rgb
            .data_bytes()
            .map_err(|e| CameraError::Format(e.to_string()))?
            .to_vec();

        let timestamp_ns = self.started.elapsed().as_nanos() as u64;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(VideoFrame::new(data, width, height, timestamp_ns, sequence))
    }

    fn close(&mut self) {
        if self.open {
            info!("Releasing capture device {}", self.index);
            if let Err(e) = self.capture.release() {
                warn!("Failed to release capture device {}: {}", self.index, e);
            }
        }
        self.open = false;
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceKind;

    #[test]
    fn test_missing_device_fails_to_open() {
        let config = CameraConfig {
            source: SourceKind::Device,
            device_index: 99,
            ..Default::default()
        };
        assert!(DeviceCamera::open(&config).is_err());
    }
}
