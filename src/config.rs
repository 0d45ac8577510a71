use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::{
    AlgorithmKind, BackgroundParams, GaussianBlurParams, MorphParams, PipelineSettings,
};
use crate::tracker::TrackerParams;

const DEFAULT_STREAM_ADDR: &str = "127.0.0.1:9466";
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_WORKING_WIDTH: u32 = 500;
const DEFAULT_BLUR_KERNEL: u32 = 15;
const DEFAULT_EROSION_KERNEL: u32 = 3;
const DEFAULT_EROSION_ITERATIONS: u32 = 4;
const DEFAULT_DILATION_KERNEL: u32 = 3;
const DEFAULT_DILATION_ITERATIONS: u32 = 8;
const DEFAULT_MIN_CONTOUR_AREA: usize = 2000;
const DEFAULT_PRESENT_THRESHOLD_MS: u64 = 10_000;
const DEFAULT_ABSENCE_THRESHOLD_MS: u64 = 3_000;
const DEFAULT_TOLERANCE_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
struct MotiondConfigFile {
    stream_addr: Option<String>,
    camera_index: Option<u32>,
    working_width: Option<u32>,
    pipeline: Option<PipelineConfigFile>,
    tracker: Option<TrackerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    gaussian_blur_kernel_size: Option<u32>,
    erosion_kernel_size: Option<u32>,
    erosion_iterations: Option<u32>,
    dilation_kernel_size: Option<u32>,
    dilation_iterations: Option<u32>,
    algorithm: Option<AlgorithmKind>,
    running_avg_alpha: Option<f32>,
    running_avg_threshold: Option<u8>,
    mog_history: Option<u32>,
    mog_var_threshold: Option<f32>,
    knn_history: Option<u32>,
    knn_dist2_threshold: Option<f32>,
    min_contour_area: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    present_threshold_ms: Option<u64>,
    absence_threshold_ms: Option<u64>,
    tolerance_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MotiondConfig {
    pub stream_addr: String,
    pub camera_index: u32,
    pub working_width: u32,
    pub pipeline: PipelineSettings,
    pub tracker: TrackerParams,
}

impl MotiondConfig {
    /// Load configuration from the file named by `MOTIOND_CONFIG`, then
    /// apply environment overrides. A missing, unreadable, or malformed
    /// file logs a warning and falls back to defaults rather than failing
    /// startup.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTIOND_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path)),
            None => MotiondConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env();
        cfg.validate();
        Ok(cfg)
    }

    /// Load from an explicit path, same fallback behavior as `load`.
    pub fn load_from_path(path: &Path) -> Self {
        let mut cfg = Self::from_file(read_config_file(path));
        cfg.apply_env();
        cfg.validate();
        cfg
    }

    fn from_file(file: MotiondConfigFile) -> Self {
        let stream_addr = file
            .stream_addr
            .unwrap_or_else(|| DEFAULT_STREAM_ADDR.to_string());
        let camera_index = file.camera_index.unwrap_or(DEFAULT_CAMERA_INDEX);
        let working_width = file.working_width.unwrap_or(DEFAULT_WORKING_WIDTH);

        let p = file.pipeline.unwrap_or_default();
        let defaults = BackgroundParams::default();
        let pipeline = PipelineSettings {
            blur: GaussianBlurParams {
                kernel_size: p.gaussian_blur_kernel_size.unwrap_or(DEFAULT_BLUR_KERNEL),
            },
            erosion: MorphParams {
                kernel_size: p.erosion_kernel_size.unwrap_or(DEFAULT_EROSION_KERNEL),
                iterations: p.erosion_iterations.unwrap_or(DEFAULT_EROSION_ITERATIONS),
            },
            dilation: MorphParams {
                kernel_size: p.dilation_kernel_size.unwrap_or(DEFAULT_DILATION_KERNEL),
                iterations: p.dilation_iterations.unwrap_or(DEFAULT_DILATION_ITERATIONS),
            },
            background: BackgroundParams {
                kind: p.algorithm.unwrap_or(defaults.kind),
                running_avg_alpha: p.running_avg_alpha.unwrap_or(defaults.running_avg_alpha),
                running_avg_threshold: p
                    .running_avg_threshold
                    .unwrap_or(defaults.running_avg_threshold),
                mog_history: p.mog_history.unwrap_or(defaults.mog_history),
                mog_var_threshold: p.mog_var_threshold.unwrap_or(defaults.mog_var_threshold),
                knn_history: p.knn_history.unwrap_or(defaults.knn_history),
                knn_dist2_threshold: p
                    .knn_dist2_threshold
                    .unwrap_or(defaults.knn_dist2_threshold),
            },
            min_contour_area: p.min_contour_area.unwrap_or(DEFAULT_MIN_CONTOUR_AREA),
        };

        let t = file.tracker.unwrap_or_default();
        let tracker = TrackerParams {
            present_threshold: Duration::from_millis(
                t.present_threshold_ms.unwrap_or(DEFAULT_PRESENT_THRESHOLD_MS),
            ),
            absence_threshold: Duration::from_millis(
                t.absence_threshold_ms.unwrap_or(DEFAULT_ABSENCE_THRESHOLD_MS),
            ),
            tolerance: Duration::from_millis(t.tolerance_ms.unwrap_or(DEFAULT_TOLERANCE_MS)),
        };

        Self {
            stream_addr,
            camera_index,
            working_width,
            pipeline,
            tracker,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MOTIOND_STREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.stream_addr = addr;
            }
        }
        if let Ok(index) = std::env::var("MOTIOND_CAMERA_INDEX") {
            match index.parse() {
                Ok(index) => self.camera_index = index,
                Err(_) => log::warn!("MOTIOND_CAMERA_INDEX is not an integer, ignoring"),
            }
        }
    }

    /// Normalize values that would break the pipeline. Even kernel sizes
    /// round down to the nearest odd value; zero-width resize targets fall
    /// back to the default.
    fn validate(&mut self) {
        self.pipeline.blur.kernel_size = normalize_kernel(self.pipeline.blur.kernel_size, "blur");
        self.pipeline.erosion.kernel_size =
            normalize_kernel(self.pipeline.erosion.kernel_size, "erosion");
        self.pipeline.dilation.kernel_size =
            normalize_kernel(self.pipeline.dilation.kernel_size, "dilation");
        if self.working_width == 0 {
            log::warn!("working_width must be positive, using {DEFAULT_WORKING_WIDTH}");
            self.working_width = DEFAULT_WORKING_WIDTH;
        }
    }
}

fn normalize_kernel(kernel_size: u32, stage: &str) -> u32 {
    if kernel_size < 3 {
        log::warn!("{stage} kernel size {kernel_size} too small, using 3");
        3
    } else if kernel_size % 2 == 0 {
        let odd = kernel_size - 1;
        log::warn!("{stage} kernel size must be odd, using {odd} instead of {kernel_size}");
        odd
    } else {
        kernel_size
    }
}

fn read_config_file(path: &Path) -> MotiondConfigFile {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!(
                "failed to read config file {}: {err}, using defaults",
                path.display()
            );
            return MotiondConfigFile::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(cfg) => cfg,
        Err(err) => {
            log::warn!(
                "invalid config file {}: {err}, using defaults",
                path.display()
            );
            MotiondConfigFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MotiondConfig::from_file(MotiondConfigFile::default());
        assert_eq!(cfg.stream_addr, DEFAULT_STREAM_ADDR);
        assert_eq!(cfg.camera_index, 0);
        assert_eq!(cfg.working_width, 500);
        assert_eq!(cfg.pipeline.blur.kernel_size, 15);
        assert_eq!(cfg.pipeline.min_contour_area, 2000);
        assert_eq!(cfg.tracker.present_threshold, Duration::from_secs(10));
        assert_eq!(cfg.tracker.absence_threshold, Duration::from_secs(3));
    }

    #[test]
    fn even_kernel_rounds_down_to_odd() {
        assert_eq!(normalize_kernel(16, "blur"), 15);
        assert_eq!(normalize_kernel(15, "blur"), 15);
        assert_eq!(normalize_kernel(2, "blur"), 3);
        assert_eq!(normalize_kernel(0, "blur"), 3);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let file: MotiondConfigFile = serde_json::from_str(
            r#"{"pipeline": {"gaussian_blur_kernel_size": 21, "algorithm": "knn"}}"#,
        )
        .unwrap();
        let cfg = MotiondConfig::from_file(file);
        assert_eq!(cfg.pipeline.blur.kernel_size, 21);
        assert_eq!(cfg.pipeline.background.kind, AlgorithmKind::Knn);
        assert_eq!(cfg.pipeline.erosion.iterations, 4);
        assert_eq!(cfg.pipeline.background.knn_history, 250);
    }
}
