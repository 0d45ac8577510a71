//! Connected-region extraction and centroid smoothing.

use std::collections::VecDeque;

use crate::frame::{Contour, Frame};

/// Smoothed-centroid window length.
pub const CENTROID_HISTORY_CAP: usize = 50;

/// Consecutive frames without a qualifying region before the smoothing
/// history is discarded.
pub const TOLERANCE_LIMIT: u32 = 18;

/// Regions of one frame plus the smoothed centroid emitted for it.
#[derive(Clone, Debug)]
pub struct ContoursInfo {
    pub contours: Vec<Contour>,
    pub centroid: (u32, u32),
}

/// Flood-fill (8-connectivity) over nonzero mask pixels.
pub fn find_regions(mask: &Frame) -> Vec<Contour> {
    let (width, height) = (mask.width as usize, mask.height as usize);
    let pixels = mask.as_bytes();
    let mut visited = vec![false; width * height];
    let mut regions = Vec::new();

    for start in 0..width * height {
        if pixels[start] == 0 || visited[start] {
            continue;
        }
        let mut points = Vec::new();
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % width, idx / width);
            points.push((x as u32, y as u32));
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let nidx = ny as usize * width + nx as usize;
                    if pixels[nidx] != 0 && !visited[nidx] {
                        visited[nidx] = true;
                        queue.push_back(nidx);
                    }
                }
            }
        }
        regions.push(Contour { points });
    }
    regions
}

/// Stateful extractor: filters regions by area, combines their centroids
/// weighted by area, and smooths the result over a bounded history so the
/// emitted point does not jitter frame to frame.
pub struct ContourExtractor {
    history: VecDeque<(f64, f64)>,
    tolerance_misses: u32,
}

impl ContourExtractor {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(CENTROID_HISTORY_CAP),
            tolerance_misses: 0,
        }
    }

    /// Process one binary mask. Returns `None` when no region meets
    /// `min_area`; misses are tolerated up to `TOLERANCE_LIMIT` before the
    /// smoothing history is dropped.
    pub fn extract(&mut self, mask: &Frame, min_area: usize) -> Option<ContoursInfo> {
        let contours: Vec<Contour> = find_regions(mask)
            .into_iter()
            .filter(|c| c.area() >= min_area)
            .collect();

        if contours.is_empty() {
            self.record_miss();
            return None;
        }
        self.tolerance_misses = 0;

        // Area-weighted mean of the qualifying regions' centroids.
        let total_area: usize = contours.iter().map(Contour::area).sum();
        let (wx, wy) = contours.iter().fold((0.0f64, 0.0f64), |(wx, wy), c| {
            let (cx, cy) = c.centroid();
            let a = c.area() as f64;
            (wx + cx * a, wy + cy * a)
        });
        let combined = (wx / total_area as f64, wy / total_area as f64);

        if self.history.len() == CENTROID_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(combined);

        let n = self.history.len() as f64;
        let (sx, sy) = self
            .history
            .iter()
            .fold((0.0f64, 0.0f64), |(sx, sy), &(x, y)| (sx + x, sy + y));
        let centroid = ((sx / n).round() as u32, (sy / n).round() as u32);

        Some(ContoursInfo { contours, centroid })
    }

    fn record_miss(&mut self) {
        self.tolerance_misses += 1;
        if self.tolerance_misses >= TOLERANCE_LIMIT {
            self.history.clear();
            self.tolerance_misses = 0;
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.tolerance_misses = 0;
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl Default for ContourExtractor {
    fn default() -> Self {
        Self::new()
    }
}
