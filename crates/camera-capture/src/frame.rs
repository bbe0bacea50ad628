//! Video frame types and processing

use image::{imageops::FilterType, ImageBuffer, Rgb, RgbImage};

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds, monotonic from stream start)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

/// Pixel rectangle inside a frame, already clamped to frame bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Build a region from corner coordinates, clamped to `frame_w` x `frame_h`.
    /// Returns `None` when the clamped region has zero area.
    pub fn from_corners(x1: i64, y1: i64, x2: i64, y2: i64, frame_w: u32, frame_h: u32) -> Option<Self> {
        let x1 = x1.clamp(0, frame_w as i64);
        let y1 = y1.clamp(0, frame_h as i64);
        let x2 = x2.clamp(0, frame_w as i64);
        let y2 = y2.clamp(0, frame_h as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    /// Area in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Create a frame from a decoded RGB image
    pub fn from_image(img: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Create a uniformly filled frame
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], timestamp_ns: u64, sequence: u32) -> Self {
        let data = rgb.iter().copied().cycle().take((width * height * 3) as usize).collect();
        Self::new(data, width, height, timestamp_ns, sequence)
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Borrow the frame as an `image` buffer (copies the pixel data)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        ImageBuffer::<Rgb<u8>, _>::from_raw(self.width, self.height, self.data.clone())
    }

    /// Crop a region of the frame
    pub fn crop(&self, region: &CropRegion) -> Option<VideoFrame> {
        if region.area() == 0
            || region.x + region.width > self.width
            || region.y + region.height > self.height
        {
            return None;
        }

        let mut cropped = Vec::with_capacity((region.width * region.height * 3) as usize);
        for row in region.y..(region.y + region.height) {
            let start = ((row * self.width + region.x) * 3) as usize;
            let end = start + (region.width * 3) as usize;
            cropped.extend_from_slice(self.data.get(start..end)?);
        }

        Some(VideoFrame {
            data: cropped,
            width: region.width,
            height: region.height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// Resize frame with bilinear filtering
    pub fn resize(&self, new_width: u32, new_height: u32) -> Option<VideoFrame> {
        let img = self.to_rgb_image()?;
        let resized = image::imageops::resize(&img, new_width, new_height, FilterType::Triangle);

        Some(VideoFrame {
            data: resized.into_raw(),
            width: new_width,
            height: new_height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region_clamps_to_frame() {
        let region = CropRegion::from_corners(-20, -5, 700, 300, 640, 480).unwrap();
        assert_eq!(region, CropRegion { x: 0, y: 0, width: 640, height: 300 });
    }

    #[test]
    fn test_crop_region_degenerate() {
        assert!(CropRegion::from_corners(100, 100, 100, 200, 640, 480).is_none());
        assert!(CropRegion::from_corners(700, 10, 900, 20, 640, 480).is_none());
    }

    #[test]
    fn test_crop_copies_pixels() {
        let mut frame = VideoFrame::filled(4, 4, [0, 0, 0], 0, 0);
        // Mark pixel (2, 1)
        let idx = ((1 * 4 + 2) * 3) as usize;
        frame.data[idx] = 255;

        let region = CropRegion { x: 1, y: 1, width: 2, height: 2 };
        let cropped = frame.crop(&region).unwrap();
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.data.len(), 12);
        assert_eq!(cropped.get_pixel(1, 0), Some([255, 0, 0]));
    }

    #[test]
    fn test_resize_dimensions() {
        let frame = VideoFrame::filled(64, 48, [10, 20, 30], 5, 1);
        let resized = frame.resize(224, 224).unwrap();
        assert_eq!(resized.data.len(), 224 * 224 * 3);
        assert_eq!(resized.get_pixel(100, 100), Some([10, 20, 30]));
        assert_eq!(resized.timestamp_ns, 5);
    }
}
