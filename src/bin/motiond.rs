//! motiond - motion surveillance daemon
//!
//! This daemon:
//! 1. Captures frames from the configured device and resizes them to the
//!    working width
//! 2. Runs the motion pipeline (blur, background subtraction, morphology,
//!    contour extraction) on its own worker thread
//! 3. Debounces raw motion into continuous-movement events
//! 4. Streams JPEG frames to every connected viewer over TCP, latest frame
//!    wins per viewer

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use motion_kernel::scheduler::{lock_unpoisoned, WorkerScheduler, WorkerSpec};
use motion_kernel::tracker::{self, MovementTracker, TrackerWorker};
use motion_kernel::{
    FeedSettings, FramePipeline, FrameStreamer, MotiondConfig, PipelineControl, SourceFeed,
    StreamServer, SubscriberSlot,
};

const FRAME_FETCHING_GROUP: &str = "frame-fetching";
const FRAME_TRANSFORM_GROUP: &str = "frame-transform";
const MOVEMENT_TRACKING_GROUP: &str = "movement-tracking";
const FRAME_STREAMING_GROUP: &str = "frame-streaming";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion surveillance daemon")]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "MOTIOND_CONFIG")]
    config: Option<PathBuf>,

    /// Capture device index, overrides the config file.
    #[arg(long, env = "MOTIOND_CAMERA_INDEX")]
    camera_index: Option<u32>,

    /// Listen address for the viewer stream, overrides the config file.
    #[arg(long, env = "MOTIOND_STREAM_ADDR")]
    stream_addr: Option<String>,

    /// Emit intermediate pipeline stages for diagnostics.
    #[arg(long)]
    preview: bool,

    /// Exit after this many seconds (for smoke testing).
    #[arg(long)]
    run_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => MotiondConfig::load_from_path(path),
        None => MotiondConfig::load()?,
    };
    if let Some(index) = args.camera_index {
        cfg.camera_index = index;
    }
    if let Some(addr) = args.stream_addr {
        cfg.stream_addr = addr;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    let mut scheduler = WorkerScheduler::new();

    // Movement tracker: consumes raw motion booleans, emits debounced
    // continuous-movement events.
    let (sample_tx, sample_rx) = mpsc::channel();
    let mut movement_tracker = MovementTracker::new(cfg.tracker);
    movement_tracker.continuous_movement.connect(|active| {
        if active {
            log::info!("continuous movement detected");
        } else {
            log::info!("movement over");
        }
    });
    scheduler.add_worker(
        TrackerWorker {
            tracker: movement_tracker,
            samples: sample_rx,
        },
        WorkerSpec::new(MOVEMENT_TRACKING_GROUP)
            .on_start(|worker: &mut TrackerWorker, token| tracker::run_loop(worker, token)),
    );

    // Vision pipeline. Frames arrive as submitted handlers; results leave
    // through signals wired up before the pipeline moves to its worker.
    let control = PipelineControl::new();
    control.set_preview(args.preview);
    let mut pipeline = FramePipeline::new(cfg.pipeline.clone(), control.clone());
    pipeline.motion_detected.connect_sender(sample_tx);
    pipeline
        .centroid_updated
        .connect(|(x, y)| log::debug!("movement centroid at ({x}, {y})"));
    pipeline.resized_frame_info.connect(|info| {
        log::info!(
            "capture resolution {}x{} ({}:{}), working size {}x{}",
            info.source_width,
            info.source_height,
            info.aspect_ratio.0,
            info.aspect_ratio.1,
            info.resized_width,
            info.resized_height
        );
    });
    if args.preview {
        pipeline.preview_frames.connect(|stages| {
            log::debug!(
                "preview: {}x{} original, {}x{} mask",
                stages.original.width,
                stages.original.height,
                stages.morphed.width,
                stages.morphed.height
            );
        });
    }
    let pipeline_handle = scheduler.add_worker(pipeline, WorkerSpec::new(FRAME_TRANSFORM_GROUP));

    // Viewer mailboxes, shared with the capture side.
    let subscribers: Arc<Mutex<Vec<(String, SubscriberSlot)>>> = Arc::new(Mutex::new(Vec::new()));

    // Capture feed: publishes resized frames to the pipeline worker and to
    // every viewer mailbox.
    let mut feed = SourceFeed::new(
        FeedSettings {
            camera_index: cfg.camera_index,
            working_width: cfg.working_width,
        },
        motion_kernel::feed::synthetic_factory(640, 480, None),
    );
    {
        let pipeline_handle = pipeline_handle.clone();
        feed.frame_published.connect(move |frame| {
            if let Err(err) = pipeline_handle.submit(move |p: &mut FramePipeline| p.on_frame(frame))
            {
                log::warn!("pipeline unavailable: {err:#}");
            }
        });
    }
    {
        let subscribers = Arc::clone(&subscribers);
        feed.frame_published.connect(move |frame| {
            for (_, slot) in lock_unpoisoned(&subscribers).iter() {
                slot.offer(frame.clone());
            }
        });
    }
    {
        let pipeline_handle = pipeline_handle.clone();
        feed.resolution_info.connect(move |info| {
            let relayed = pipeline_handle.submit(move |p: &mut FramePipeline| {
                p.on_resolution(info.source_width, info.source_height, info.resized_width)
            });
            if let Err(err) = relayed {
                log::warn!("pipeline unavailable: {err:#}");
            }
        });
    }
    {
        let shutdown = Arc::clone(&shutdown);
        feed.no_input.connect(move |()| {
            log::error!("no capture device available, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        });
    }
    {
        let shutdown = Arc::clone(&shutdown);
        feed.capture_failed.connect(move |message| {
            log::error!("capture failed: {message}");
            shutdown.store(true, Ordering::SeqCst);
        });
    }
    scheduler.add_worker(
        feed,
        WorkerSpec::new(FRAME_FETCHING_GROUP)
            .on_start(|feed: &mut SourceFeed, token| feed.run(token)),
    );

    scheduler.start_group(MOVEMENT_TRACKING_GROUP)?;
    scheduler.start_group(FRAME_TRANSFORM_GROUP)?;
    scheduler.start_group(FRAME_FETCHING_GROUP)?;

    let server = StreamServer::bind(&cfg.stream_addr)?;
    let (term_tx, term_rx) = mpsc::channel();

    let deadline = args.run_secs.map(|s| Instant::now() + Duration::from_secs(s));
    while !shutdown.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                log::info!("run deadline reached");
                break;
            }
        }

        match server.poll_accept() {
            Ok(Some(stream)) => {
                let slot = SubscriberSlot::new();
                let mut streamer = FrameStreamer::new(stream, slot.clone());
                let id = streamer.id().to_string();
                streamer.connection_terminated.connect_sender(term_tx.clone());
                lock_unpoisoned(&subscribers).push((id.clone(), slot));
                scheduler.add_worker(
                    streamer,
                    WorkerSpec::new(FRAME_STREAMING_GROUP)
                        .with_id(id)
                        .on_start(|streamer: &mut FrameStreamer, token| streamer.run(token)),
                );
                scheduler.start_group(FRAME_STREAMING_GROUP)?;
            }
            Ok(None) => {}
            Err(err) => log::error!("accept failed: {err:#}"),
        }

        while let Ok(id) = term_rx.try_recv() {
            lock_unpoisoned(&subscribers).retain(|(sub_id, _)| *sub_id != id);
            scheduler.remove_worker_by_id(&id, FRAME_STREAMING_GROUP);
        }

        std::thread::sleep(ACCEPT_POLL_INTERVAL);
    }

    log::info!("stopping worker groups");
    scheduler.stop_all_groups();
    log::info!("motiond stopped");
    Ok(())
}
