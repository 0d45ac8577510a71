//! Frame containers and per-frame motion data.
//!
//! - `Frame`: owned 2D pixel buffer (grayscale or interleaved RGB).
//! - `Contour`: one connected region of a binary motion mask.
//! - `MotionSample`: per-frame pipeline output consumed by the tracker.
//! - `PreviewFrames`: intermediate stages for diagnostic display.
//!
//! Frames are owned by exactly one processing stage at a time and cloned
//! when handed to independent consumers (fanout, display), so no frame is
//! ever mutated from two threads.

use anyhow::{anyhow, Result};

/// Working width every captured frame is resized to before processing.
pub const WORKING_WIDTH: u32 = 500;

/// Owned pixel buffer. `channels` is 1 (grayscale) or 3 (RGB).
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: got {} bytes, expected {} ({}x{}x{})",
                data.len(),
                expected,
                width,
                height,
                channels
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Grayscale frame filled with zeros.
    pub fn gray_zeroed(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize],
            width,
            height,
            channels: 1,
        }
    }

    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::new(data, width, height, 1)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Nearest-neighbor resize to `new_width`, preserving aspect ratio.
    pub fn resize_to_width(&self, new_width: u32) -> Frame {
        if new_width == self.width || self.width == 0 {
            return self.clone();
        }
        let new_height =
            ((self.height as u64 * new_width as u64) / self.width as u64).max(1) as u32;
        let ch = self.channels as usize;
        let mut out = vec![0u8; new_width as usize * new_height as usize * ch];
        for y in 0..new_height {
            let src_y = (y as u64 * self.height as u64 / new_height as u64) as usize;
            for x in 0..new_width {
                let src_x = (x as u64 * self.width as u64 / new_width as u64) as usize;
                let src = (src_y * self.width as usize + src_x) * ch;
                let dst = (y as usize * new_width as usize + x as usize) * ch;
                out[dst..dst + ch].copy_from_slice(&self.data[src..src + ch]);
            }
        }
        Frame {
            data: out,
            width: new_width,
            height: new_height,
            channels: self.channels,
        }
    }
}

/// Reduced aspect ratio of a resolution, e.g. 640x480 -> (4, 3).
pub fn aspect_ratio(width: u32, height: u32) -> (u32, u32) {
    let g = gcd(width.max(1), height.max(1));
    (width.max(1) / g, height.max(1) / g)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// One connected region of a binary mask. Area is the filled pixel count.
#[derive(Clone, Debug, Default)]
pub struct Contour {
    pub points: Vec<(u32, u32)>,
}

impl Contour {
    pub fn area(&self) -> usize {
        self.points.len()
    }

    /// Arithmetic mean of the region's pixels.
    pub fn centroid(&self) -> (f64, f64) {
        if self.points.is_empty() {
            return (0.0, 0.0);
        }
        let (sx, sy) = self
            .points
            .iter()
            .fold((0u64, 0u64), |(sx, sy), &(x, y)| (sx + x as u64, sy + y as u64));
        let n = self.points.len() as f64;
        (sx as f64 / n, sy as f64 / n)
    }
}

/// Per-frame output of the vision pipeline.
#[derive(Clone, Debug)]
pub struct MotionSample {
    pub contours: Vec<Contour>,
    /// Temporally smoothed centroid, absent when no region qualified.
    pub centroid: Option<(u32, u32)>,
    pub motion_present: bool,
}

impl MotionSample {
    pub fn quiet() -> Self {
        Self {
            contours: Vec::new(),
            centroid: None,
            motion_present: false,
        }
    }
}

/// Intermediate pipeline stages for diagnostic display.
#[derive(Clone, Debug)]
pub struct PreviewFrames {
    pub original: Frame,
    pub blurred: Frame,
    pub thresholded: Frame,
    pub morphed: Frame,
}

/// Resolution info published once per capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizedFrameInfo {
    pub source_width: u32,
    pub source_height: u32,
    pub aspect_ratio: (u32, u32),
    pub resized_width: u32,
    pub resized_height: u32,
}

impl ResizedFrameInfo {
    pub fn from_resolution(source_width: u32, source_height: u32, resized_width: u32) -> Self {
        let ratio = aspect_ratio(source_width, source_height);
        let resized_height = resized_width * ratio.1 / ratio.0.max(1);
        Self {
            source_width,
            source_height,
            aspect_ratio: ratio,
            resized_width,
            resized_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, 1).is_err());
        assert!(Frame::new(vec![0u8; 16], 4, 4, 1).is_ok());
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let frame = Frame::new(vec![0u8; 640 * 480 * 3], 640, 480, 3).unwrap();
        let resized = frame.resize_to_width(500);
        assert_eq!(resized.width, 500);
        assert_eq!(resized.height, 375);
        assert_eq!(resized.channels, 3);
        assert_eq!(resized.as_bytes().len(), 500 * 375 * 3);
    }

    #[test]
    fn aspect_ratio_reduces() {
        assert_eq!(aspect_ratio(640, 480), (4, 3));
        assert_eq!(aspect_ratio(1920, 1080), (16, 9));
    }

    #[test]
    fn contour_centroid_is_pixel_mean() {
        let contour = Contour {
            points: vec![(0, 0), (2, 0), (0, 2), (2, 2)],
        };
        assert_eq!(contour.area(), 4);
        assert_eq!(contour.centroid(), (1.0, 1.0));
    }

    #[test]
    fn resized_info_uses_reduced_ratio() {
        let info = ResizedFrameInfo::from_resolution(640, 480, 500);
        assert_eq!(info.aspect_ratio, (4, 3));
        assert_eq!(info.resized_height, 375);
    }
}
