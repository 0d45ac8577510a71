//! Motion Kernel
//!
//! This crate implements a real-time motion surveillance pipeline: frames
//! come in from a capture device, pass through a vision pipeline that
//! isolates moving regions, and leave as debounced movement events and
//! JPEG streams for connected viewers.
//!
//! # Architecture
//!
//! Work is split across named worker-thread groups managed by a
//! `WorkerScheduler`; components communicate through typed `Signal`s, so
//! each worker owns its state and receives input as messages.
//!
//! - `feed`: capture loop, resizes every frame to a fixed working width
//! - `pipeline`: grayscale, blur, background subtraction, morphology,
//!   contour extraction with centroid smoothing
//! - `tracker`: hysteresis over raw per-frame motion booleans
//! - `fanout`: per-viewer latest-wins mailboxes and length-prefixed JPEG
//!   streaming over TCP
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers, contours, per-frame motion data
//! - `signal`: typed callback registry used for all cross-worker wiring
//! - `scheduler`: worker groups with colocation and lifecycle control
//! - `config`: JSON config file, env overrides, validation

pub mod config;
pub mod fanout;
pub mod feed;
pub mod frame;
pub mod pipeline;
pub mod scheduler;
pub mod signal;
pub mod tracker;

pub use config::MotiondConfig;
pub use fanout::{FrameStreamer, StreamServer, SubscriberSlot, FRAME_SEND_INTERVAL};
pub use feed::{FeedSettings, FrameSource, NoInputError, SourceFeed, SyntheticSource};
pub use frame::{Contour, Frame, MotionSample, PreviewFrames, ResizedFrameInfo, WORKING_WIDTH};
pub use pipeline::{FramePipeline, PipelineControl, PipelineSettings};
pub use scheduler::{StopToken, WorkerHandle, WorkerScheduler, WorkerSpec};
pub use signal::Signal;
pub use tracker::{MovementTracker, TrackerParams, TrackerState};
