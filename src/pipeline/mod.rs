//! Motion-detection pipeline.
//!
//! A `FramePipeline` runs on its own worker and consumes frames one at a
//! time: grayscale, Gaussian blur, background subtraction, erosion,
//! dilation, then connected-region extraction with centroid smoothing.
//! Results leave through signals; control arrives through a cloneable
//! `PipelineControl` whose changes take effect at the next frame boundary.

pub mod contours;
pub mod ops;
pub mod subtract;

use std::sync::{Arc, Mutex};

pub use contours::{ContourExtractor, ContoursInfo, CENTROID_HISTORY_CAP, TOLERANCE_LIMIT};
pub use subtract::{make_subtractor, AlgorithmKind, BackgroundParams, BackgroundSubtractor};

use crate::frame::{Frame, MotionSample, PreviewFrames, ResizedFrameInfo};
use crate::scheduler::lock_unpoisoned;
use crate::signal::Signal;

#[derive(Clone, Copy, Debug)]
pub struct GaussianBlurParams {
    pub kernel_size: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct MorphParams {
    pub kernel_size: u32,
    pub iterations: u32,
}

/// Full parameter set of the pipeline. Applied atomically between frames.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub blur: GaussianBlurParams,
    pub erosion: MorphParams,
    pub dilation: MorphParams,
    pub background: BackgroundParams,
    pub min_contour_area: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            blur: GaussianBlurParams { kernel_size: 15 },
            erosion: MorphParams {
                kernel_size: 3,
                iterations: 4,
            },
            dilation: MorphParams {
                kernel_size: 3,
                iterations: 8,
            },
            background: BackgroundParams::default(),
            min_contour_area: 2000,
        }
    }
}

struct ControlState {
    enabled: bool,
    preview: bool,
    pending: Option<PipelineSettings>,
    reset_requested: bool,
}

/// Cloneable handle for adjusting a running pipeline from other threads.
/// Every request is picked up at the next frame boundary.
#[derive(Clone)]
pub struct PipelineControl {
    shared: Arc<Mutex<ControlState>>,
}

impl PipelineControl {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ControlState {
                enabled: true,
                preview: false,
                pending: None,
                reset_requested: false,
            })),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock_unpoisoned(&self.shared).enabled = enabled;
    }

    pub fn set_preview(&self, preview: bool) {
        lock_unpoisoned(&self.shared).preview = preview;
    }

    /// Queue a full settings replacement. The pipeline rebuilds its
    /// background model and drops its smoothing history when it applies.
    pub fn reconfigure(&self, settings: PipelineSettings) {
        lock_unpoisoned(&self.shared).pending = Some(settings);
    }

    /// Ask the pipeline to drop all learned state while keeping settings.
    pub fn request_reset(&self) {
        lock_unpoisoned(&self.shared).reset_requested = true;
    }
}

impl Default for PipelineControl {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FramePipeline {
    settings: PipelineSettings,
    subtractor: Box<dyn BackgroundSubtractor>,
    extractor: ContourExtractor,
    control: PipelineControl,
    pub motion_detected: Signal<bool>,
    pub contours_found: Signal<MotionSample>,
    pub centroid_updated: Signal<(u32, u32)>,
    pub preview_frames: Signal<PreviewFrames>,
    pub resized_frame_info: Signal<ResizedFrameInfo>,
}

impl FramePipeline {
    pub fn new(settings: PipelineSettings, control: PipelineControl) -> Self {
        let subtractor = make_subtractor(&settings.background);
        Self {
            settings,
            subtractor,
            extractor: ContourExtractor::new(),
            control,
            motion_detected: Signal::new(),
            contours_found: Signal::new(),
            centroid_updated: Signal::new(),
            preview_frames: Signal::new(),
            resized_frame_info: Signal::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Entry point for each captured frame. Applies any pending control
    /// requests first, then processes unless disabled.
    pub fn on_frame(&mut self, frame: Frame) {
        // Drain the control state under the lock, apply after releasing it.
        let (pending, reset_requested, enabled, preview) = {
            let mut state = lock_unpoisoned(&self.control.shared);
            (
                state.pending.take(),
                std::mem::take(&mut state.reset_requested),
                state.enabled,
                state.preview,
            )
        };
        if let Some(settings) = pending {
            self.apply_settings(settings);
        }
        if reset_requested {
            self.reset();
        }
        if !enabled {
            log::debug!("pipeline disabled, dropping frame");
            return;
        }
        self.process_frame(frame, preview);
    }

    /// Run the full transform chain on one frame and emit results.
    pub fn process_frame(&mut self, frame: Frame, preview: bool) {
        let gray = ops::to_grayscale(&frame);
        let blurred = ops::gaussian_blur(&gray, self.settings.blur.kernel_size);
        let thresholded = self.subtractor.apply(&blurred);
        let eroded = ops::erode(
            &thresholded,
            self.settings.erosion.kernel_size,
            self.settings.erosion.iterations,
        );
        let morphed = ops::dilate(
            &eroded,
            self.settings.dilation.kernel_size,
            self.settings.dilation.iterations,
        );

        let result = self
            .extractor
            .extract(&morphed, self.settings.min_contour_area);

        match &result {
            Some(info) => {
                self.motion_detected.emit(true);
                self.centroid_updated.emit(info.centroid);
                self.contours_found.emit(MotionSample {
                    contours: info.contours.clone(),
                    centroid: Some(info.centroid),
                    motion_present: true,
                });
            }
            None => {
                self.motion_detected.emit(false);
                self.contours_found.emit(MotionSample::quiet());
            }
        }

        if preview && self.preview_frames.is_connected() {
            self.preview_frames.emit(PreviewFrames {
                original: frame,
                blurred,
                thresholded,
                morphed,
            });
        }
    }

    /// Forward the capture resolution to display consumers.
    pub fn on_resolution(&self, source_width: u32, source_height: u32, resized_width: u32) {
        self.resized_frame_info.emit(ResizedFrameInfo::from_resolution(
            source_width,
            source_height,
            resized_width,
        ));
    }

    fn apply_settings(&mut self, settings: PipelineSettings) {
        log::info!(
            "pipeline reconfigured: blur k={}, min area {}",
            settings.blur.kernel_size,
            settings.min_contour_area
        );
        self.subtractor = make_subtractor(&settings.background);
        self.extractor.reset();
        self.settings = settings;
    }

    /// Drop all learned state: background model and smoothing history.
    pub fn reset(&mut self) {
        self.subtractor.reset();
        self.extractor.reset();
    }
}
