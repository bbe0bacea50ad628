//! Facial landmark extraction

use std::path::Path;
use std::sync::Mutex;

use camera_capture::{CropRegion, VideoFrame};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::landmarks::{indices, LandmarkSet};
use crate::locator::{square_region, BlazeFaceLocator, FaceLocator};
use crate::{DmsConfig, DmsError};

/// Face-mesh input resolution
pub const MESH_INPUT_SIZE: u32 = 192;

/// Produces landmarks for the first face in a frame
pub trait LandmarkDetector: Send {
    /// `Ok(None)` when no face is found
    fn detect(&self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError>;
}

/// Two-stage landmark extraction: a [`FaceLocator`] finds the face, the
/// 468-point mesh model runs on a square crop around it.
pub struct FaceMeshDetector {
    locator: Box<dyn FaceLocator>,
    session: Mutex<Session>,
    presence_threshold: f32,
    crop_margin: f32,
    landmark_output: String,
    presence_output: String,
}

impl FaceMeshDetector {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        let detector_path = config
            .face_detector_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("face_detector_model_path is not set".into()))?;
        let mesh_path = config
            .landmark_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("landmark_model_path is not set".into()))?;

        let locator = BlazeFaceLocator::load(Path::new(detector_path), config)?;
        Self::load(Box::new(locator), Path::new(mesh_path), config)
    }

    pub fn load(locator: Box<dyn FaceLocator>, model_path: &Path, config: &DmsConfig) -> Result<Self, DmsError> {
        info!("Loading face mesh model from {}", model_path.display());

        if !model_path.exists() {
            return Err(DmsError::ModelLoad(format!(
                "face mesh model not found at {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| DmsError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DmsError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DmsError::ModelLoad(e.to_string()))?;

        Ok(Self {
            locator,
            session: Mutex::new(session),
            presence_threshold: config.face_confidence,
            crop_margin: config.face_crop_margin,
            landmark_output: config.landmark_output.clone(),
            presence_output: config.presence_output.clone(),
        })
    }
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
        let Some(face) = self.locator.locate(frame)? else {
            return Ok(None);
        };
        let Some(region) = square_region(&face, self.crop_margin, frame.width, frame.height) else {
            debug!("Face box {:?} too small for the mesh", face);
            return Ok(None);
        };

        let crop = frame.crop(&region).ok_or(DmsError::EmptyCrop)?;
        let resized = crop
            .resize(MESH_INPUT_SIZE, MESH_INPUT_SIZE)
            .ok_or_else(|| DmsError::ImageProcessing("Failed to create image buffer".into()))?;
        let input = image_tensor(&resized, true, false)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DmsError::Inference("face mesh session poisoned".into()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        if let Some(presence) = outputs.get(self.presence_output.as_str()) {
            let (_, data) = presence
                .try_extract_tensor::<f32>()
                .map_err(|e| DmsError::Inference(e.to_string()))?;
            let score = data.first().copied().map(sigmoid).unwrap_or(0.0);
            if score < self.presence_threshold {
                debug!("Face presence {:.2} below threshold", score);
                return Ok(None);
            }
        }

        let output = outputs
            .get(self.landmark_output.as_str())
            .ok_or_else(|| DmsError::Inference(format!("missing output {}", self.landmark_output)))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        decode_mesh(data, &region).map(Some)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// RGB frame as a `[1, 3, H, W]` (`nchw`) or `[1, H, W, 3]` float tensor,
/// scaled to [0, 1] or, when `signed`, to [-1, 1].
pub(crate) fn image_tensor(frame: &VideoFrame, nchw: bool, signed: bool) -> Result<Value, DmsError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if frame.data.len() != w * h * 3 {
        return Err(DmsError::ImageProcessing("frame buffer does not match its dimensions".into()));
    }

    let scale = |v: u8| {
        let unit = v as f32 / 255.0;
        if signed {
            unit * 2.0 - 1.0
        } else {
            unit
        }
    };

    let (shape, values) = if nchw {
        let mut chw = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    chw.push(scale(frame.data[(y * w + x) * 3 + c]));
                }
            }
        }
        (vec![1usize, 3, h, w], chw)
    } else {
        (vec![1usize, h, w, 3], frame.data.iter().copied().map(scale).collect())
    };

    Tensor::from_array((shape, values.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| DmsError::Inference(e.to_string()))
}

/// Map flat `[x, y, z]` triples in mesh-input pixels back to frame pixels
/// through the crop they were computed on
pub fn decode_mesh(data: &[f32], crop: &CropRegion) -> Result<LandmarkSet, DmsError> {
    if data.len() < (indices::MAX_USED + 1) * 3 {
        return Err(DmsError::KeypointsMissing);
    }

    let sx = crop.width as f32 / MESH_INPUT_SIZE as f32;
    let sy = crop.height as f32 / MESH_INPUT_SIZE as f32;

    let points = data
        .chunks_exact(3)
        .take(indices::FACE_MESH_POINTS)
        .map(|p| (crop.x as f32 + p[0] * sx, crop.y as f32 + p[1] * sy))
        .collect();

    Ok(LandmarkSet::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mesh_maps_through_crop() {
        let mut data = vec![0.0f32; indices::FACE_MESH_POINTS * 3];
        data[0] = 96.0;
        data[1] = 48.0;
        data[3] = 192.0;
        data[4] = 192.0;

        // 96x96 face crop at (300, 200) in a 640x480 frame
        let crop = CropRegion::from_corners(300, 200, 396, 296, 640, 480).unwrap();
        let set = decode_mesh(&data, &crop).unwrap();

        assert_eq!(set.len(), indices::FACE_MESH_POINTS);
        assert_eq!(set.point(0), Some((348.0, 224.0)));
        assert_eq!(set.point(1), Some((396.0, 296.0)));
        assert_eq!(set.point(2), Some((300.0, 200.0)));
    }

    #[test]
    fn test_decode_mesh_rejects_short_output() {
        let data = vec![0.0f32; 30];
        let crop = CropRegion::from_corners(0, 0, 192, 192, 640, 480).unwrap();
        assert!(matches!(decode_mesh(&data, &crop), Err(DmsError::KeypointsMissing)));
    }

    #[test]
    fn test_missing_model_paths() {
        let config = DmsConfig::default();
        assert!(matches!(FaceMeshDetector::new(&config), Err(DmsError::Config(_))));

        let config = DmsConfig {
            face_detector_model_path: Some("/nonexistent/face_detector.onnx".into()),
            ..Default::default()
        };
        assert!(matches!(FaceMeshDetector::new(&config), Err(DmsError::Config(_))));

        let config = DmsConfig {
            face_detector_model_path: Some("/nonexistent/face_detector.onnx".into()),
            landmark_model_path: Some("/nonexistent/face_mesh.onnx".into()),
            ..Default::default()
        };
        assert!(matches!(FaceMeshDetector::new(&config), Err(DmsError::ModelLoad(_))));
    }

    #[test]
    fn test_image_tensor_layouts() {
        let frame = VideoFrame::filled(4, 2, [255, 0, 51], 0, 0);

        let nchw = image_tensor(&frame, true, false).unwrap();
        let (shape, data) = nchw.try_extract_tensor::<f32>().unwrap();
        assert_eq!(shape.to_vec(), vec![1i64, 3, 2, 4]);
        assert_eq!(data[0], 1.0);
        assert_eq!(data[8], 0.0);
        assert!((data[16] - 0.2).abs() < 1e-6);

        let nhwc = image_tensor(&frame, false, true).unwrap();
        let (shape, data) = nhwc.try_extract_tensor::<f32>().unwrap();
        assert_eq!(shape.to_vec(), vec![1i64, 2, 4, 3]);
        assert_eq!(&data[..2], &[1.0, -1.0]);
        assert!((data[2] + 0.6).abs() < 1e-6);
    }
}
