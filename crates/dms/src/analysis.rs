//! Geometric signals and per-frame analysis results

use serde::{Deserialize, Serialize};

use crate::landmarks::{indices, LandmarkSet};
use crate::state::EyePhase;
use crate::DmsError;

/// Denominators at or below this are treated as zero
const MIN_DISTANCE: f32 = 1e-6;

/// DMS alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmsAlert {
    /// Sustained eye closure confirmed by the classifier
    Drowsiness,

    /// Mouth opened past the yawn threshold
    Yawning,
}

impl DmsAlert {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmsAlert::Drowsiness => "drowsiness",
            DmsAlert::Yawning => "yawning",
        }
    }
}

/// Aspect ratios derived from one landmark set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSignals {
    pub left_ear: f32,
    pub right_ear: f32,
    /// Mean of both eyes
    pub ear: f32,
    pub mar: f32,
}

impl FrameSignals {
    /// Compute EAR and MAR from face-mesh landmarks
    pub fn from_landmarks(landmarks: &LandmarkSet) -> Result<Self, DmsError> {
        let left_ear = eye_aspect_ratio(landmarks, &indices::LEFT_EYE)?;
        let right_ear = eye_aspect_ratio(landmarks, &indices::RIGHT_EYE)?;
        let mar = mouth_aspect_ratio(landmarks, &indices::MOUTH)?;

        Ok(Self {
            left_ear,
            right_ear,
            ear: (left_ear + right_ear) / 2.0,
            mar,
        })
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn gather<const N: usize>(landmarks: &LandmarkSet, idx: &[usize; N]) -> Result<[(f32, f32); N], DmsError> {
    let mut points = [(0.0, 0.0); N];
    for (slot, &i) in points.iter_mut().zip(idx.iter()) {
        *slot = landmarks.point(i).ok_or(DmsError::KeypointsMissing)?;
    }
    Ok(points)
}

/// Eye aspect ratio: `(|p1-p5| + |p2-p4|) / (2 |p0-p3|)`
pub fn eye_aspect_ratio(landmarks: &LandmarkSet, eye: &[usize; 6]) -> Result<f32, DmsError> {
    let p = gather(landmarks, eye)?;
    let vertical_a = distance(p[1], p[5]);
    let vertical_b = distance(p[2], p[4]);
    let horizontal = distance(p[0], p[3]);

    if horizontal.is_nan() || horizontal <= MIN_DISTANCE {
        return Err(DmsError::DegenerateGeometry("eye width"));
    }

    Ok((vertical_a + vertical_b) / (2.0 * horizontal))
}

/// Mouth aspect ratio: `|top-bottom| / |left-right|`
pub fn mouth_aspect_ratio(landmarks: &LandmarkSet, mouth: &[usize; 4]) -> Result<f32, DmsError> {
    let [top, bottom, left, right] = gather(landmarks, mouth)?;
    let horizontal = distance(left, right);

    if horizontal.is_nan() || horizontal <= MIN_DISTANCE {
        return Err(DmsError::DegenerateGeometry("mouth width"));
    }

    Ok(distance(top, bottom) / horizontal)
}

/// Complete per-frame analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmsAnalysis {
    /// Landmarks of the first detected face
    pub landmarks: LandmarkSet,

    /// EAR / MAR for this frame
    pub signals: FrameSignals,

    /// Debounce phase after this frame
    pub eye_phase: EyePhase,

    /// Classifier confidence, present only when the debouncer confirmed
    /// and the classifier produced a score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_confidence: Option<f32>,

    /// Drowsiness confirmed by both debouncer and classifier
    pub drowsy: bool,

    /// MAR above threshold on this frame
    pub yawning: bool,
}

impl DmsAnalysis {
    /// Candidate alert for this frame. A yawn takes precedence when both fire.
    pub fn alert(&self) -> Option<DmsAlert> {
        if self.yawning {
            Some(DmsAlert::Yawning)
        } else if self.drowsy {
            Some(DmsAlert::Drowsiness)
        } else {
            None
        }
    }
}
