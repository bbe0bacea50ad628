//! Facial landmark sets and face-mesh index tables

use camera_capture::CropRegion;
use serde::{Deserialize, Serialize};

/// Face-mesh landmark indices used for the aspect ratios
pub mod indices {
    /// Left eye: outer corner, two upper lid points, inner corner, two lower lid points
    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
    /// Right eye, same ordering as [`LEFT_EYE`]
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
    /// Mouth: inner top lip, inner bottom lip, left corner, right corner
    pub const MOUTH: [usize; 4] = [13, 14, 78, 308];

    /// Number of points produced by the face-mesh model
    pub const FACE_MESH_POINTS: usize = 468;

    /// Highest index the aspect-ratio math touches
    pub const MAX_USED: usize = 387;
}

/// Landmarks of one detected face in one frame, in pixel space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<(f32, f32)>,
}

impl LandmarkSet {
    pub fn new(points: Vec<(f32, f32)>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<(f32, f32)> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Uniformly scale every coordinate
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.points.iter().map(|&(x, y)| (x * factor, y * factor)).collect())
    }

    /// Bounding box of all points plus `padding`, clamped to the frame.
    /// `None` when the box degenerates to zero area.
    pub fn face_region(&self, padding: u32, frame_w: u32, frame_h: u32) -> Option<CropRegion> {
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;

        for &(x, y) in &self.points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if !min_x.is_finite() || !max_x.is_finite() {
            return None;
        }

        // Truncate to integer pixels before padding
        let pad = padding as i64;
        CropRegion::from_corners(
            min_x as i64 - pad,
            min_y as i64 - pad,
            max_x as i64 + pad,
            max_y as i64 + pad,
            frame_w,
            frame_h,
        )
    }
}
