//! Face localisation
//!
//! First stage of landmark extraction: find the face box so the mesh model
//! only ever sees a face crop. The ONNX implementation decodes a short-range
//! BlazeFace detector (128x128 input, 896 SSD anchors).

use std::path::Path;
use std::sync::Mutex;

use camera_capture::{CropRegion, VideoFrame};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::{debug, info, trace};

use crate::detector::image_tensor;
use crate::{DmsConfig, DmsError};

/// Detector input resolution
pub const DETECTOR_INPUT_SIZE: u32 = 128;

/// Values per anchor in the regressor output: box (4) + six keypoints (12)
const REGRESSOR_STRIDE: usize = 16;

/// Finds the first face in a frame
pub trait FaceLocator: Send {
    /// Face bounding box in frame pixels, `None` when no face is found
    fn locate(&self, frame: &VideoFrame) -> Result<Option<CropRegion>, DmsError>;
}

/// Face box in normalised [0, 1] image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

impl FaceBox {
    /// Pixel region in a `frame_w` x `frame_h` frame, clamped
    pub fn to_region(&self, frame_w: u32, frame_h: u32) -> Option<CropRegion> {
        let (fw, fh) = (frame_w as f32, frame_h as f32);
        CropRegion::from_corners(
            ((self.cx - self.width / 2.0) * fw).floor() as i64,
            ((self.cy - self.height / 2.0) * fh).floor() as i64,
            ((self.cx + self.width / 2.0) * fw).ceil() as i64,
            ((self.cy + self.height / 2.0) * fh).ceil() as i64,
            frame_w,
            frame_h,
        )
    }
}

/// Anchor centres of the short-range model: a 16x16 grid with two anchors
/// per cell, then an 8x8 grid with six.
pub fn blazeface_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(896);
    for (grid, per_cell) in [(16usize, 2usize), (8, 6)] {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                anchors.extend(std::iter::repeat((cx, cy)).take(per_cell));
            }
        }
    }
    anchors
}

/// Highest-scoring box at or above `threshold`.
///
/// `regressors` holds 16 values per anchor in input pixels, `scores` one
/// logit per anchor.
pub fn decode_detections(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[(f32, f32)],
    threshold: f32,
) -> Result<Option<FaceBox>, DmsError> {
    if scores.len() < anchors.len() || regressors.len() < anchors.len() * REGRESSOR_STRIDE {
        return Err(DmsError::Inference(format!(
            "face detector returned {} scores and {} regressors for {} anchors",
            scores.len(),
            regressors.len(),
            anchors.len()
        )));
    }

    let scale = DETECTOR_INPUT_SIZE as f32;
    let best = anchors
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (&(ax, ay), &logit))| (i, ax, ay, sigmoid(logit.clamp(-100.0, 100.0))))
        .filter(|&(_, _, _, score)| score >= threshold)
        .max_by(|a, b| a.3.total_cmp(&b.3));

    Ok(best.map(|(i, ax, ay, score)| {
        let r = &regressors[i * REGRESSOR_STRIDE..(i + 1) * REGRESSOR_STRIDE];
        FaceBox {
            cx: ax + r[0] / scale,
            cy: ay + r[1] / scale,
            width: r[2] / scale,
            height: r[3] / scale,
            score,
        }
    }))
}

/// Expand a face box to a square with `margin` extra on each side, clamped.
/// `None` when what is left is too small for the mesh model.
pub fn square_region(face: &CropRegion, margin: f32, frame_w: u32, frame_h: u32) -> Option<CropRegion> {
    let size = face.width.max(face.height) as f32 * (1.0 + margin);
    let cx = face.x as f32 + face.width as f32 / 2.0;
    let cy = face.y as f32 + face.height as f32 / 2.0;
    let half = size / 2.0;

    let region = CropRegion::from_corners(
        (cx - half).round() as i64,
        (cy - half).round() as i64,
        (cx + half).round() as i64,
        (cy + half).round() as i64,
        frame_w,
        frame_h,
    )?;

    (region.width >= 8 && region.height >= 8).then_some(region)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ONNX Runtime wrapper for the short-range BlazeFace detector.
///
/// Input NHWC `[1, 128, 128, 3]` in [-1, 1].
pub struct BlazeFaceLocator {
    session: Mutex<Session>,
    anchors: Vec<(f32, f32)>,
    threshold: f32,
    regressors_output: String,
    scores_output: String,
}

impl BlazeFaceLocator {
    pub fn load(model_path: &Path, config: &DmsConfig) -> Result<Self, DmsError> {
        info!("Loading face detector from {}", model_path.display());

        if !model_path.exists() {
            return Err(DmsError::ModelLoad(format!(
                "face detector model not found at {}",
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
            session: Mutex::new(session),
            anchors: blazeface_anchors(),
            threshold: config.face_confidence,
            regressors_output: config.face_regressors_output.clone(),
            scores_output: config.face_scores_output.clone(),
        })
    }
}

impl FaceLocator for BlazeFaceLocator {
    fn locate(&self, frame: &VideoFrame) -> Result<Option<CropRegion>, DmsError> {
        let resized = frame
            .resize(DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE)
            .ok_or_else(|| DmsError::ImageProcessing("Failed to create image buffer".into()))?;
        let input = image_tensor(&resized, false, true)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DmsError::Inference("face detector session poisoned".into()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let (_, regressors) = outputs
            .get(self.regressors_output.as_str())
            .ok_or_else(|| DmsError::Inference(format!("missing output {}", self.regressors_output)))?
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;
        let (_, scores) = outputs
            .get(self.scores_output.as_str())
            .ok_or_else(|| DmsError::Inference(format!("missing output {}", self.scores_output)))?
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let Some(face) = decode_detections(regressors, scores, &self.anchors, self.threshold)? else {
            debug!("No face above {:.2}", self.threshold);
            return Ok(None);
        };

        trace!(score = face.score, "face at ({:.3}, {:.3})", face.cx, face.cy);
        Ok(face.to_region(frame.width, frame.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs_with_face(anchor: usize, logit: f32, reg: [f32; 4]) -> (Vec<f32>, Vec<f32>) {
        let mut regressors = vec![0.0; 896 * REGRESSOR_STRIDE];
        let mut scores = vec![-10.0; 896];
        regressors[anchor * REGRESSOR_STRIDE..anchor * REGRESSOR_STRIDE + 4].copy_from_slice(&reg);
        scores[anchor] = logit;
        (regressors, scores)
    }

    #[test]
    fn test_anchor_layout() {
        let anchors = blazeface_anchors();
        assert_eq!(anchors.len(), 896);
        assert_eq!(anchors[0], (1.0 / 32.0, 1.0 / 32.0));
        assert_eq!(anchors[1], anchors[0]);
        // First anchor of the 8x8 grid
        assert_eq!(anchors[512], (1.0 / 16.0, 1.0 / 16.0));
        assert_eq!(anchors[895], (15.0 / 16.0, 15.0 / 16.0));
    }

    #[test]
    fn test_decode_picks_best_face() {
        let anchors = blazeface_anchors();
        // Anchor 512 sits at (1/16, 1/16); offset it by 16 px and make it 64 px wide
        let (mut regressors, mut scores) = outputs_with_face(512, 3.0, [16.0, 16.0, 64.0, 32.0]);
        scores[10] = 1.0;
        regressors[10 * REGRESSOR_STRIDE + 2] = 10.0;

        let face = decode_detections(&regressors, &scores, &anchors, 0.5).unwrap().unwrap();

        assert!((face.cx - 0.1875).abs() < 1e-6);
        assert!((face.cy - 0.1875).abs() < 1e-6);
        assert!((face.width - 0.5).abs() < 1e-6);
        assert!((face.height - 0.25).abs() < 1e-6);
        assert!(face.score > 0.95);

        let region = face.to_region(640, 480).unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (0, 30, 280, 120));
    }

    #[test]
    fn test_decode_below_threshold_is_none() {
        let anchors = blazeface_anchors();
        let (regressors, scores) = outputs_with_face(100, -1.0, [0.0, 0.0, 40.0, 40.0]);
        assert_eq!(decode_detections(&regressors, &scores, &anchors, 0.5).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_short_outputs() {
        let anchors = blazeface_anchors();
        let result = decode_detections(&[0.0; 16], &[0.0; 896], &anchors, 0.5);
        assert!(matches!(result, Err(DmsError::Inference(_))));
    }

    #[test]
    fn test_square_region_pads_and_clamps() {
        let face = CropRegion::from_corners(300, 200, 380, 300, 640, 480).unwrap();
        let region = square_region(&face, 0.25, 640, 480).unwrap();
        assert_eq!((region.x, region.y, region.width, region.height), (278, 188, 125, 125));

        // Face at the frame corner loses the part outside
        let corner = CropRegion::from_corners(0, 0, 40, 40, 640, 480).unwrap();
        let region = square_region(&corner, 0.25, 640, 480).unwrap();
        assert_eq!((region.x, region.y), (0, 0));
        assert_eq!((region.width, region.height), (45, 45));

        let tiny = CropRegion::from_corners(0, 0, 4, 4, 640, 480).unwrap();
        assert_eq!(square_region(&tiny, 0.25, 640, 480), None);
    }
}
