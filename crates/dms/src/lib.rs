//! Driver Monitoring System (DMS)
//!
//! Per-frame drowsiness decision pipeline:
//! - Face localisation and facial landmark extraction (face mesh on the crop)
//! - Eye and mouth aspect ratios
//! - Eye-closure debounce over consecutive frames
//! - Classifier confirmation of sustained closure
//! - Yawn detection from mouth opening

pub mod analysis;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod landmarks;
pub mod locator;
pub mod state;

pub use analysis::{DmsAlert, DmsAnalysis, FrameSignals};
pub use classifier::{DrowsinessClassifier, OnnxClassifier};
pub use config::DmsConfig;
pub use detector::{FaceMeshDetector, LandmarkDetector};
pub use landmarks::LandmarkSet;
pub use locator::{BlazeFaceLocator, FaceLocator};
pub use state::{DebounceState, EyePhase};

use camera_capture::VideoFrame;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("No face detected")]
    NoFace,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Keypoints missing for feature calculation")]
    KeypointsMissing,

    #[error("Degenerate geometry: {0} is zero")]
    DegenerateGeometry(&'static str),

    #[error("Face crop is empty")]
    EmptyCrop,
}

impl DmsError {
    /// Errors that only invalidate the current frame
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DmsError::NoFace
                | DmsError::KeypointsMissing
                | DmsError::DegenerateGeometry(_)
                | DmsError::EmptyCrop
                | DmsError::ImageProcessing(_)
                | DmsError::Inference(_)
        )
    }
}

/// Driver monitoring module
///
/// Stateless with respect to the debounce counter: the caller owns the
/// [`DebounceState`] and threads it through [`DmsModule::analyze`].
pub struct DmsModule {
    config: DmsConfig,
    detector: Box<dyn LandmarkDetector>,
    classifier: Box<dyn DrowsinessClassifier>,
}

impl DmsModule {
    /// Create a new DMS module with configuration and model adapters
    pub fn new(
        config: DmsConfig,
        detector: Box<dyn LandmarkDetector>,
        classifier: Box<dyn DrowsinessClassifier>,
    ) -> Result<Self, DmsError> {
        config.validate()?;
        info!(
            "DMS ready (EAR < {}, {} frames, MAR > {}, confidence > {})",
            config.ear_threshold, config.consec_frames, config.mar_threshold, config.confidence_threshold
        );
        Ok(Self {
            config,
            detector,
            classifier,
        })
    }

    /// Load both ONNX models named in the configuration
    pub fn from_config(config: DmsConfig) -> Result<Self, DmsError> {
        let detector = FaceMeshDetector::new(&config)?;
        let classifier_path = config
            .classifier_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("classifier_model_path is not set".into()))?;
        let classifier = OnnxClassifier::load(classifier_path, config.classifier_input_size)?;

        Self::new(config, Box::new(detector), Box::new(classifier))
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    /// Analyze a single frame.
    ///
    /// An `Err` means the frame was skipped; the caller keeps its previous
    /// debounce state. On `Ok` the returned state replaces the caller's.
    pub fn analyze(
        &self,
        frame: &VideoFrame,
        state: DebounceState,
    ) -> Result<(DebounceState, DmsAnalysis), DmsError> {
        let landmarks = self.detector.detect(frame)?.ok_or(DmsError::NoFace)?;
        let signals = FrameSignals::from_landmarks(&landmarks)?;

        trace!(ear = signals.ear, mar = signals.mar, "frame {}", frame.sequence);

        let (state, eye_phase) = state.step(signals.ear < self.config.ear_threshold, self.config.consec_frames);

        let mut classifier_confidence = None;
        let mut drowsy = false;

        if eye_phase == EyePhase::Confirmed {
            match self.confirm(frame, &landmarks) {
                Ok(confidence) => {
                    debug!("Classifier confidence {:.2}", confidence);
                    classifier_confidence = Some(confidence);
                    drowsy = confidence > self.config.confidence_threshold;
                    if !drowsy {
                        debug!("Eye closure not confirmed by classifier");
                    }
                }
                Err(e) => {
                    warn!("Drowsiness confirmation failed: {}", e);
                }
            }
        }

        let yawning = signals.mar > self.config.mar_threshold;

        Ok((
            state,
            DmsAnalysis {
                landmarks,
                signals,
                eye_phase,
                classifier_confidence,
                drowsy,
                yawning,
            },
        ))
    }

    /// Crop the face around the landmarks and ask the classifier
    fn confirm(&self, frame: &VideoFrame, landmarks: &LandmarkSet) -> Result<f32, DmsError> {
        let region = landmarks
            .face_region(self.config.crop_padding, frame.width, frame.height)
            .ok_or(DmsError::EmptyCrop)?;
        let face = frame.crop(&region).ok_or(DmsError::EmptyCrop)?;

        let confidence = self.classifier.predict(&face)?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DmsError::Inference(format!("confidence {} outside [0, 1]", confidence)));
        }
        Ok(confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::synthetic_face;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedDetector(Option<LandmarkSet>);

    impl LandmarkDetector for FixedDetector {
        fn detect(&self, _frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
            Ok(self.0.clone())
        }
    }

    struct FixedClassifier {
        result: Result<f32, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl DrowsinessClassifier for FixedClassifier {
        fn predict(&self, face: &VideoFrame) -> Result<f32, DmsError> {
            assert!(face.width > 0 && face.height > 0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.map_err(|e| DmsError::Inference(e.into()))
        }
    }

    fn module(face: Option<LandmarkSet>, result: Result<f32, &'static str>) -> (DmsModule, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let module = DmsModule::new(
            DmsConfig::default(),
            Box::new(FixedDetector(face)),
            Box::new(FixedClassifier {
                result,
                calls: calls.clone(),
            }),
        )
        .unwrap();
        (module, calls)
    }

    fn frame() -> VideoFrame {
        VideoFrame::filled(640, 480, [90, 90, 90], 0, 0)
    }

    fn run_closed(module: &DmsModule, frames: u32) -> (DebounceState, Vec<DmsAnalysis>) {
        let mut state = DebounceState::default();
        let mut out = Vec::new();
        for _ in 0..frames {
            let (next, analysis) = module.analyze(&frame(), state).unwrap();
            state = next;
            out.push(analysis);
        }
        (state, out)
    }

    #[test]
    fn test_confidence_exactly_threshold_does_not_confirm() {
        let (module, calls) = module(Some(synthetic_face(0.10, 0.2, 320.0, 240.0)), Ok(0.7));
        let (state, analyses) = run_closed(&module, 20);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.counter, 0);
        let last = analyses.last().unwrap();
        assert_eq!(last.eye_phase, EyePhase::Confirmed);
        assert!(!last.drowsy);
        assert_eq!(last.alert(), None);
    }

    #[test]
    fn test_confidence_above_threshold_confirms() {
        let (module, _) = module(Some(synthetic_face(0.10, 0.2, 320.0, 240.0)), Ok(0.71));
        let (_, analyses) = run_closed(&module, 20);

        assert!(analyses[..19].iter().all(|a| a.alert().is_none()));
        assert_eq!(analyses[19].alert(), Some(DmsAlert::Drowsiness));
        assert_eq!(analyses[19].classifier_confidence, Some(0.71));
    }

    #[test]
    fn test_classifier_failure_fails_closed() {
        let (module, calls) = module(Some(synthetic_face(0.10, 0.2, 320.0, 240.0)), Err("boom"));
        let (state, analyses) = run_closed(&module, 20);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.counter, 0);
        assert!(!analyses[19].drowsy);
        assert_eq!(analyses[19].classifier_confidence, None);
    }

    #[test]
    fn test_empty_crop_skips_classifier() {
        // All landmarks far outside the frame: EAR math still works, crop does not
        let face = synthetic_face(0.10, 0.2, 5000.0, 5000.0);
        let (module, calls) = module(Some(face), Ok(0.99));
        let (state, analyses) = run_closed(&module, 20);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.counter, 0);
        assert!(!analyses[19].drowsy);
    }

    #[test]
    fn test_yawn_signals_every_frame() {
        let (module, calls) = module(Some(synthetic_face(0.3, 0.8, 320.0, 240.0)), Ok(0.99));
        let (_, analyses) = run_closed(&module, 3);

        assert!(analyses.iter().all(|a| a.alert() == Some(DmsAlert::Yawning)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_face_is_transient() {
        let (module, _) = module(None, Ok(0.99));
        let err = module.analyze(&frame(), DebounceState { counter: 7 }).unwrap_err();
        assert!(matches!(err, DmsError::NoFace));
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DmsConfig {
            consec_frames: 0,
            ..Default::default()
        };
        let result = DmsModule::new(
            config,
            Box::new(FixedDetector(None)),
            Box::new(FixedClassifier {
                result: Ok(0.0),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        );
        assert!(result.is_err());
    }
}
