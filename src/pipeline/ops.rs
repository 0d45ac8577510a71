//! Raster primitives for the motion pipeline.
//!
//! All operations take grayscale frames (except `to_grayscale`) and return
//! new frames of identical dimensions. Kernel sizes are expected to be odd;
//! the configuration layer normalizes even values before they reach here.

use crate::frame::Frame;

/// ITU-R BT.601 luma weights, matching the conversion the capture stack
/// feeds into background subtraction.
pub fn to_grayscale(frame: &Frame) -> Frame {
    if frame.channels == 1 {
        return frame.clone();
    }
    let src = frame.as_bytes();
    let ch = frame.channels as usize;
    let mut out = Vec::with_capacity(frame.pixel_count());
    for pixel in src.chunks_exact(ch) {
        let (r, g, b) = (pixel[0] as u32, pixel[1] as u32, pixel[2] as u32);
        out.push(((r * 299 + g * 587 + b * 114) / 1000) as u8);
    }
    Frame::from_gray(out, frame.width, frame.height).expect("luma buffer sized to frame")
}

/// Separable Gaussian blur. Sigma is derived from the kernel size the same
/// way OpenCV does when sigma is left at zero.
pub fn gaussian_blur(frame: &Frame, kernel_size: u32) -> Frame {
    let k = kernel_size.max(1) as usize;
    if k <= 1 {
        return frame.clone();
    }
    let sigma = 0.3 * ((k as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = k / 2;
    let mut weights = Vec::with_capacity(k);
    for i in 0..k {
        let d = i as f64 - radius as f64;
        weights.push((-(d * d) / (2.0 * sigma * sigma)).exp());
    }
    let sum: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }

    let (width, height) = (frame.width as usize, frame.height as usize);
    let src = frame.as_bytes();

    // Horizontal pass with clamped edges.
    let mut mid = vec![0f64; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, w) in weights.iter().enumerate() {
                let sx = (x as isize + i as isize - radius as isize).clamp(0, width as isize - 1);
                acc += src[y * width + sx as usize] as f64 * w;
            }
            mid[y * width + x] = acc;
        }
    }

    // Vertical pass.
    let mut out = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, w) in weights.iter().enumerate() {
                let sy = (y as isize + i as isize - radius as isize).clamp(0, height as isize - 1);
                acc += mid[sy as usize * width + x] * w;
            }
            out[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    Frame::from_gray(out, frame.width, frame.height).expect("blur output sized to frame")
}

/// Morphological erosion: neighborhood minimum, iterated.
pub fn erode(frame: &Frame, kernel_size: u32, iterations: u32) -> Frame {
    morph(frame, kernel_size, iterations, u8::min)
}

/// Morphological dilation: neighborhood maximum, iterated.
pub fn dilate(frame: &Frame, kernel_size: u32, iterations: u32) -> Frame {
    morph(frame, kernel_size, iterations, u8::max)
}

fn morph(frame: &Frame, kernel_size: u32, iterations: u32, fold: fn(u8, u8) -> u8) -> Frame {
    let radius = (kernel_size.max(1) / 2) as isize;
    if radius == 0 || iterations == 0 {
        return frame.clone();
    }
    let (width, height) = (frame.width as usize, frame.height as usize);
    let mut current = frame.as_bytes().to_vec();
    let mut next = vec![0u8; width * height];
    for _ in 0..iterations {
        for y in 0..height as isize {
            for x in 0..width as isize {
                let mut value = current[y as usize * width + x as usize];
                for dy in -radius..=radius {
                    let sy = (y + dy).clamp(0, height as isize - 1) as usize;
                    for dx in -radius..=radius {
                        let sx = (x + dx).clamp(0, width as isize - 1) as usize;
                        value = fold(value, current[sy * width + sx]);
                    }
                }
                next[y as usize * width + x as usize] = value;
            }
        }
        std::mem::swap(&mut current, &mut next);
    }
    Frame::from_gray(current, frame.width, frame.height).expect("morph output sized to frame")
}

/// Per-pixel absolute difference of two equally sized grayscale frames.
pub fn absdiff(a: &Frame, b: &Frame) -> Frame {
    debug_assert_eq!(a.pixel_count(), b.pixel_count());
    let out = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .map(|(&pa, &pb)| pa.abs_diff(pb))
        .collect();
    Frame::from_gray(out, a.width, a.height).expect("absdiff output sized to frame")
}

/// Binarize: values above `threshold` become 255, everything else 0.
pub fn threshold_binary(frame: &Frame, threshold: u8) -> Frame {
    let out = frame
        .as_bytes()
        .iter()
        .map(|&p| if p > threshold { 255 } else { 0 })
        .collect();
    Frame::from_gray(out, frame.width, frame.height).expect("threshold output sized to frame")
}
