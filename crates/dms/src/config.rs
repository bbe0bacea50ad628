//! DMS configuration

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// EAR below this value counts as an eyes-closed frame
    pub ear_threshold: f32,

    /// Consecutive eyes-closed frames required to confirm drowsiness
    pub consec_frames: u32,

    /// MAR above this value signals a yawn
    pub mar_threshold: f32,

    /// Padding (pixels) around the landmark extrema for the classifier crop
    pub crop_padding: u32,

    /// Classifier input resolution (square)
    pub classifier_input_size: u32,

    /// Classifier confidence must be strictly above this to confirm drowsiness
    pub confidence_threshold: f32,

    /// Face-presence score required to accept landmarks
    pub face_confidence: f32,

    /// Extra fraction of the face box added around it before the mesh crop
    pub face_crop_margin: f32,

    /// Model paths
    pub face_detector_model_path: Option<String>,
    pub landmark_model_path: Option<String>,
    pub classifier_model_path: Option<String>,

    /// Output tensor names of the face-mesh model
    pub landmark_output: String,
    pub presence_output: String,

    /// Output tensor names of the face detector
    pub face_regressors_output: String,
    pub face_scores_output: String,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            consec_frames: 20,
            mar_threshold: 0.6,
            crop_padding: 20,
            classifier_input_size: 224,
            confidence_threshold: 0.7,
            face_confidence: 0.5,
            face_crop_margin: 0.25,
            face_detector_model_path: None,
            landmark_model_path: None,
            classifier_model_path: None,
            landmark_output: "landmarks".to_string(),
            presence_output: "score".to_string(),
            face_regressors_output: "regressors".to_string(),
            face_scores_output: "classificators".to_string(),
        }
    }
}

impl DmsConfig {
    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), DmsError> {
        if self.consec_frames == 0 {
            return Err(DmsError::Config("consec_frames must be at least 1".into()));
        }
        if !(self.ear_threshold > 0.0 && self.mar_threshold > 0.0) {
            return Err(DmsError::Config("aspect-ratio thresholds must be positive".into()));
        }
        if self.classifier_input_size == 0 {
            return Err(DmsError::Config("classifier_input_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(DmsError::Config("confidence_threshold must be within [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.face_crop_margin) {
            return Err(DmsError::Config("face_crop_margin must be within [0, 1]".into()));
        }
        Ok(())
    }
}
