//! Drowsiness classifier adapter
//!
//! Wraps the frozen binary image classifier. The model sees a square RGB
//! face crop, NHWC, scaled to [0, 1], and returns one drowsiness score.

use camera_capture::VideoFrame;
use image::imageops::FilterType;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::DmsError;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Binary drowsiness classifier over a face crop
pub trait DrowsinessClassifier: Send {
    /// Confidence in [0, 1] that the face shows drowsiness
    fn predict(&self, face: &VideoFrame) -> Result<f32, DmsError>;
}

/// Resize to `size` x `size` and normalize to [0, 1], NHWC order
pub fn preprocess(face: &VideoFrame, size: u32) -> Result<Vec<f32>, DmsError> {
    let img = face
        .to_rgb_image()
        .ok_or_else(|| DmsError::ImageProcessing("Failed to create image buffer".into()))?;

    let resized = image::imageops::resize(&img, size, size, FilterType::Triangle);
    Ok(resized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect())
}

/// ONNX classifier executed with tract
pub struct OnnxClassifier {
    model: OnnxPlan,
    input_size: u32,
}

impl OnnxClassifier {
    pub fn load(path: &str, input_size: u32) -> Result<Self, DmsError> {
        info!("Loading drowsiness classifier from {}", path);
        let s = input_size as usize;

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact([1, s, s, 3]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| DmsError::ModelLoad(e.to_string()))?;

        Ok(Self { model, input_size })
    }
}

impl DrowsinessClassifier for OnnxClassifier {
    fn predict(&self, face: &VideoFrame) -> Result<f32, DmsError> {
        let s = self.input_size as usize;
        let data = preprocess(face, self.input_size)?;

        let input: Tensor = tract_ndarray::Array4::from_shape_vec((1, s, s, 3), data)
            .map_err(|e| DmsError::ImageProcessing(e.to_string()))?
            .into();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let scores = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let score = scores
            .iter()
            .next()
            .copied()
            .ok_or_else(|| DmsError::Inference("classifier returned an empty tensor".into()))?;

        debug!("Classifier raw score {:.3}", score);
        Ok(score)
    }
}
