//! Background-subtraction strategies.
//!
//! Every strategy exposes the same two-operation capability (`apply`,
//! `reset`) so the pipeline stays agnostic to which model is active:
//!
//! - `RunningAverage`: exponentially weighted floating background, absolute
//!   difference against the current frame, binarized at a fixed threshold.
//! - `MixtureOfGaussians`: per-pixel adaptive Gaussian mixture
//!   parameterized by history length and a variance threshold.
//! - `Knn`: per-pixel sample history parameterized by history length and a
//!   squared distance threshold; a pixel is foreground when too few stored
//!   samples are close to it.
//!
//! Shadows are never classified separately.

use serde::Deserialize;

use super::ops;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    RunningAverage,
    MixtureOfGaussians,
    Knn,
}

/// Parameters for all three strategies; only the fields of the active
/// `kind` are consulted.
#[derive(Clone, Debug)]
pub struct BackgroundParams {
    pub kind: AlgorithmKind,
    pub running_avg_alpha: f32,
    pub running_avg_threshold: u8,
    pub mog_history: u32,
    pub mog_var_threshold: f32,
    pub knn_history: u32,
    pub knn_dist2_threshold: f32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            kind: AlgorithmKind::RunningAverage,
            running_avg_alpha: 0.05,
            running_avg_threshold: 25,
            mog_history: 250,
            mog_var_threshold: 16.0,
            knn_history: 250,
            knn_dist2_threshold: 400.0,
        }
    }
}

/// The capability the pipeline requires from a background model.
pub trait BackgroundSubtractor: Send {
    /// Consume one grayscale frame, update the model, return a binary mask
    /// (255 = foreground).
    fn apply(&mut self, frame: &Frame) -> Frame;

    /// Discard the learned background model.
    fn reset(&mut self);
}

/// Construct a fresh strategy instance for `params`.
pub fn make_subtractor(params: &BackgroundParams) -> Box<dyn BackgroundSubtractor> {
    match params.kind {
        AlgorithmKind::RunningAverage => Box::new(RunningAverage::new(
            params.running_avg_alpha,
            params.running_avg_threshold,
        )),
        AlgorithmKind::MixtureOfGaussians => Box::new(MixtureOfGaussians::new(
            params.mog_history,
            params.mog_var_threshold,
        )),
        AlgorithmKind::Knn => Box::new(Knn::new(params.knn_history, params.knn_dist2_threshold)),
    }
}

// ----------------------------------------------------------------------------
// Running average
// ----------------------------------------------------------------------------

pub struct RunningAverage {
    alpha: f32,
    threshold: u8,
    background: Option<Vec<f32>>,
}

impl RunningAverage {
    pub fn new(alpha: f32, threshold: u8) -> Self {
        Self {
            alpha,
            threshold,
            background: None,
        }
    }
}

impl BackgroundSubtractor for RunningAverage {
    fn apply(&mut self, frame: &Frame) -> Frame {
        let pixels = frame.as_bytes();
        let background = match &mut self.background {
            Some(background) if background.len() == pixels.len() => background,
            _ => {
                self.background = Some(pixels.iter().map(|&p| p as f32).collect());
                self.background.as_mut().expect("background just seeded")
            }
        };
        for (bg, &p) in background.iter_mut().zip(pixels) {
            *bg += self.alpha * (p as f32 - *bg);
        }
        let diff: Vec<u8> = background
            .iter()
            .zip(pixels)
            .map(|(&bg, &p)| (p as f32 - bg).abs().round().min(255.0) as u8)
            .collect();
        let diff = Frame::from_gray(diff, frame.width, frame.height)
            .expect("diff buffer sized to frame");
        ops::threshold_binary(&diff, self.threshold)
    }

    fn reset(&mut self) {
        self.background = None;
    }
}

// ----------------------------------------------------------------------------
// Mixture of Gaussians
// ----------------------------------------------------------------------------

const MODE_COUNT: usize = 3;
const INITIAL_VARIANCE: f32 = 225.0;
const MIN_VARIANCE: f32 = 4.0;
/// A matched mode counts as background once it has accumulated this much
/// weight.
const BACKGROUND_WEIGHT: f32 = 0.1;

#[derive(Clone, Copy, Default)]
struct GaussMode {
    weight: f32,
    mean: f32,
    variance: f32,
}

pub struct MixtureOfGaussians {
    learning_rate: f32,
    var_threshold: f32,
    modes: Vec<[GaussMode; MODE_COUNT]>,
}

impl MixtureOfGaussians {
    pub fn new(history: u32, var_threshold: f32) -> Self {
        Self {
            learning_rate: 1.0 / history.max(1) as f32,
            var_threshold,
            modes: Vec::new(),
        }
    }

    fn classify(&mut self, index: usize, value: f32) -> bool {
        let modes = &mut self.modes[index];
        let lr = self.learning_rate;

        let mut matched: Option<usize> = None;
        for (i, mode) in modes.iter().enumerate() {
            if mode.weight <= 0.0 {
                continue;
            }
            let d = value - mode.mean;
            if d * d <= self.var_threshold * mode.variance {
                matched = Some(i);
                break;
            }
        }

        match matched {
            Some(i) => {
                for (j, mode) in modes.iter_mut().enumerate() {
                    if j == i {
                        mode.weight += lr * (1.0 - mode.weight);
                        let d = value - mode.mean;
                        mode.mean += lr * d;
                        mode.variance = (mode.variance + lr * (d * d - mode.variance))
                            .max(MIN_VARIANCE);
                    } else {
                        mode.weight *= 1.0 - lr;
                    }
                }
                modes[i].weight < BACKGROUND_WEIGHT
            }
            None => {
                // Replace the weakest mode with a new one centered on the
                // observation.
                let weakest = (0..MODE_COUNT)
                    .min_by(|&a, &b| {
                        modes[a]
                            .weight
                            .partial_cmp(&modes[b].weight)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap_or(0);
                modes[weakest] = GaussMode {
                    weight: lr,
                    mean: value,
                    variance: INITIAL_VARIANCE,
                };
                true
            }
        }
    }
}

impl BackgroundSubtractor for MixtureOfGaussians {
    fn apply(&mut self, frame: &Frame) -> Frame {
        let pixels = frame.as_bytes().to_vec();
        if self.modes.len() != pixels.len() {
            // Seed the dominant mode from the first observed frame.
            self.modes = pixels
                .iter()
                .map(|&p| {
                    let mut modes = [GaussMode::default(); MODE_COUNT];
                    modes[0] = GaussMode {
                        weight: 1.0,
                        mean: p as f32,
                        variance: INITIAL_VARIANCE,
                    };
                    modes
                })
                .collect();
        }
        let mask: Vec<u8> = pixels
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if self.classify(i, p as f32) {
                    255
                } else {
                    0
                }
            })
            .collect();
        Frame::from_gray(mask, frame.width, frame.height).expect("mask sized to frame")
    }

    fn reset(&mut self) {
        self.modes.clear();
    }
}

// ----------------------------------------------------------------------------
// K-nearest-neighbors
// ----------------------------------------------------------------------------

const SAMPLES_PER_PIXEL: usize = 8;
const REQUIRED_NEIGHBORS: usize = 2;

pub struct Knn {
    dist2_threshold: f32,
    /// Model refresh period in frames so that the sample set spans roughly
    /// `history` frames.
    update_stride: u64,
    samples: Vec<u8>,
    frame_index: u64,
}

impl Knn {
    pub fn new(history: u32, dist2_threshold: f32) -> Self {
        Self {
            dist2_threshold,
            update_stride: (history as u64 / SAMPLES_PER_PIXEL as u64).max(1),
            samples: Vec::new(),
            frame_index: 0,
        }
    }
}

impl BackgroundSubtractor for Knn {
    fn apply(&mut self, frame: &Frame) -> Frame {
        let pixels = frame.as_bytes();
        let count = pixels.len();
        if self.samples.len() != count * SAMPLES_PER_PIXEL {
            self.samples = Vec::with_capacity(count * SAMPLES_PER_PIXEL);
            for &p in pixels {
                self.samples.extend(std::iter::repeat(p).take(SAMPLES_PER_PIXEL));
            }
            self.frame_index = 0;
        }

        let refresh = self.frame_index % self.update_stride == 0;
        let slot = ((self.frame_index / self.update_stride) % SAMPLES_PER_PIXEL as u64) as usize;
        self.frame_index += 1;

        let mut mask = vec![0u8; count];
        for (i, &p) in pixels.iter().enumerate() {
            let base = i * SAMPLES_PER_PIXEL;
            let neighbors = self.samples[base..base + SAMPLES_PER_PIXEL]
                .iter()
                .filter(|&&s| {
                    let d = p as f32 - s as f32;
                    d * d <= self.dist2_threshold
                })
                .count();
            if neighbors < REQUIRED_NEIGHBORS {
                mask[i] = 255;
            }
            if refresh {
                self.samples[base + slot] = p;
            }
        }
        Frame::from_gray(mask, frame.width, frame.height).expect("mask sized to frame")
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.frame_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8, width: u32, height: u32) -> Frame {
        Frame::from_gray(vec![value; (width * height) as usize], width, height).unwrap()
    }

    fn foreground_pixels(mask: &Frame) -> usize {
        mask.as_bytes().iter().filter(|&&p| p == 255).count()
    }

    #[test]
    fn running_average_flags_sudden_change() {
        let mut sub = RunningAverage::new(0.05, 25);
        for _ in 0..10 {
            let mask = sub.apply(&flat(40, 8, 8));
            assert_eq!(foreground_pixels(&mask), 0);
        }
        let mask = sub.apply(&flat(200, 8, 8));
        assert_eq!(foreground_pixels(&mask), 64);
    }

    #[test]
    fn running_average_reset_forgets_background() {
        let mut sub = RunningAverage::new(0.05, 25);
        for _ in 0..10 {
            sub.apply(&flat(40, 8, 8));
        }
        sub.reset();
        // First frame after reset seeds a fresh background, so even a very
        // different scene produces no foreground.
        let mask = sub.apply(&flat(200, 8, 8));
        assert_eq!(foreground_pixels(&mask), 0);
    }

    #[test]
    fn mixture_of_gaussians_settles_then_detects() {
        let mut sub = MixtureOfGaussians::new(50, 16.0);
        for _ in 0..20 {
            let mask = sub.apply(&flat(40, 8, 8));
            assert_eq!(foreground_pixels(&mask), 0);
        }
        let mask = sub.apply(&flat(200, 8, 8));
        assert_eq!(foreground_pixels(&mask), 64);
    }

    #[test]
    fn knn_settles_then_detects() {
        let mut sub = Knn::new(64, 400.0);
        for _ in 0..20 {
            let mask = sub.apply(&flat(40, 8, 8));
            assert_eq!(foreground_pixels(&mask), 0);
        }
        let mask = sub.apply(&flat(200, 8, 8));
        assert_eq!(foreground_pixels(&mask), 64);
    }

    #[test]
    fn factory_builds_each_kind() {
        for kind in [
            AlgorithmKind::RunningAverage,
            AlgorithmKind::MixtureOfGaussians,
            AlgorithmKind::Knn,
        ] {
            let params = BackgroundParams {
                kind,
                ..BackgroundParams::default()
            };
            let mut sub = make_subtractor(&params);
            let mask = sub.apply(&flat(40, 4, 4));
            assert_eq!((mask.width, mask.height), (4, 4));
        }
    }
}
