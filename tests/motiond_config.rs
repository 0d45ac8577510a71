use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use motion_kernel::config::MotiondConfig;
use motion_kernel::pipeline::AlgorithmKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTIOND_CONFIG",
        "MOTIOND_STREAM_ADDR",
        "MOTIOND_CAMERA_INDEX",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "stream_addr": "0.0.0.0:9500",
        "camera_index": 2,
        "working_width": 640,
        "pipeline": {
            "gaussian_blur_kernel_size": 21,
            "erosion_iterations": 2,
            "algorithm": "mixture_of_gaussians",
            "mog_history": 500,
            "min_contour_area": 1500
        },
        "tracker": {
            "present_threshold_ms": 5000,
            "absence_threshold_ms": 2000,
            "tolerance_ms": 500
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MOTIOND_CONFIG", file.path());
    std::env::set_var("MOTIOND_CAMERA_INDEX", "1");

    let cfg = MotiondConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.stream_addr, "0.0.0.0:9500");
    // Environment beats the file.
    assert_eq!(cfg.camera_index, 1);
    assert_eq!(cfg.working_width, 640);
    assert_eq!(cfg.pipeline.blur.kernel_size, 21);
    assert_eq!(cfg.pipeline.erosion.iterations, 2);
    assert_eq!(
        cfg.pipeline.background.kind,
        AlgorithmKind::MixtureOfGaussians
    );
    assert_eq!(cfg.pipeline.background.mog_history, 500);
    assert_eq!(cfg.pipeline.min_contour_area, 1500);
    assert_eq!(cfg.tracker.present_threshold, Duration::from_secs(5));
    assert_eq!(cfg.tracker.absence_threshold, Duration::from_secs(2));
    assert_eq!(cfg.tracker.tolerance, Duration::from_millis(500));

    // Untouched fields keep their defaults.
    assert_eq!(cfg.pipeline.dilation.iterations, 8);
    assert_eq!(cfg.pipeline.background.running_avg_threshold, 25);
}

#[test]
fn malformed_config_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json at all").expect("write config");

    let cfg = MotiondConfig::load_from_path(file.path());

    assert_eq!(cfg.stream_addr, "127.0.0.1:9466");
    assert_eq!(cfg.camera_index, 0);
    assert_eq!(cfg.working_width, 500);
    assert_eq!(cfg.pipeline.blur.kernel_size, 15);
    assert_eq!(cfg.tracker.present_threshold, Duration::from_secs(10));
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MotiondConfig::load_from_path(std::path::Path::new("/nonexistent/motiond.json"));
    assert_eq!(cfg.stream_addr, "127.0.0.1:9466");
    assert_eq!(cfg.pipeline.min_contour_area, 2000);
}

#[test]
fn even_kernel_sizes_are_normalized_to_odd() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "pipeline": {
            "gaussian_blur_kernel_size": 16,
            "erosion_kernel_size": 4,
            "dilation_kernel_size": 2
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let cfg = MotiondConfig::load_from_path(file.path());
    assert_eq!(cfg.pipeline.blur.kernel_size, 15);
    assert_eq!(cfg.pipeline.erosion.kernel_size, 3);
    assert_eq!(cfg.pipeline.dilation.kernel_size, 3);
}
