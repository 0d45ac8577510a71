//! Frame acquisition.
//!
//! `SourceFeed` drives a `FrameSource` in a loop: open, publish the native
//! resolution, then read frames, resize them to the working width, and emit
//! them until the source ends or the stop token fires. A missing device is
//! reported separately from a device that fails mid-capture.

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::frame::{Frame, ResizedFrameInfo, WORKING_WIDTH};
use crate::scheduler::{lock_unpoisoned, StopToken};
use crate::signal::Signal;

/// No capture device answered at the configured index. Distinct from
/// runtime capture failures so the supervisor can react differently.
#[derive(Debug)]
pub struct NoInputError {
    pub camera_index: u32,
}

impl fmt::Display for NoInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no capture device at index {}", self.camera_index)
    }
}

impl std::error::Error for NoInputError {}

#[derive(Clone, Copy, Debug)]
pub struct FeedSettings {
    pub camera_index: u32,
    pub working_width: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            working_width: WORKING_WIDTH,
        }
    }
}

/// A device or stream that yields raw frames.
pub trait FrameSource: Send {
    /// Open the source and return its native (width, height). Warmup
    /// delays belong here, before the first `read`.
    fn open(&mut self) -> Result<(u32, u32)>;

    /// Next frame, or `None` when the stream ended cleanly.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn close(&mut self) {}
}

/// Builds a fresh source for each capture session.
pub type SourceFactory = Box<dyn FnMut(&FeedSettings) -> Result<Box<dyn FrameSource>> + Send>;

pub struct SourceFeed {
    settings: Arc<Mutex<FeedSettings>>,
    factory: SourceFactory,
    pub frame_published: Signal<Frame>,
    pub resolution_info: Signal<ResizedFrameInfo>,
    pub no_input: Signal<()>,
    pub capture_failed: Signal<String>,
}

impl SourceFeed {
    pub fn new(settings: FeedSettings, factory: SourceFactory) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            factory,
            frame_published: Signal::new(),
            resolution_info: Signal::new(),
            no_input: Signal::new(),
            capture_failed: Signal::new(),
        }
    }

    /// Shared settings handle; changes are observed the next time `run`
    /// starts a capture session.
    pub fn settings_handle(&self) -> Arc<Mutex<FeedSettings>> {
        Arc::clone(&self.settings)
    }

    pub fn update_settings(&self, settings: FeedSettings) {
        *lock_unpoisoned(&self.settings) = settings;
    }

    /// One capture session: open, publish resolution, pump frames until the
    /// token fires, the stream ends, or a read fails.
    pub fn run(&mut self, token: StopToken) {
        let settings = *lock_unpoisoned(&self.settings);
        let mut source = match (self.factory)(&settings) {
            Ok(source) => source,
            Err(err) => {
                self.report_open_failure(err);
                return;
            }
        };
        let (width, height) = match source.open() {
            Ok(res) => res,
            Err(err) => {
                self.report_open_failure(err);
                return;
            }
        };
        log::info!(
            "capture open: {}x{} at index {}, resizing to width {}",
            width,
            height,
            settings.camera_index,
            settings.working_width
        );
        self.resolution_info.emit(ResizedFrameInfo::from_resolution(
            width,
            height,
            settings.working_width,
        ));

        while !token.is_stopped() {
            match source.read() {
                Ok(Some(frame)) => {
                    self.frame_published
                        .emit(frame.resize_to_width(settings.working_width));
                }
                Ok(None) => {
                    log::info!("capture stream ended");
                    break;
                }
                Err(err) => {
                    log::error!("capture read failed: {err:#}");
                    self.capture_failed.emit(format!("{err:#}"));
                    break;
                }
            }
        }
        source.close();
    }

    fn report_open_failure(&self, err: anyhow::Error) {
        if let Some(no_input) = err.downcast_ref::<NoInputError>() {
            log::error!("{no_input}");
            self.no_input.emit(());
        } else {
            log::error!("capture open failed: {err:#}");
            self.capture_failed.emit(format!("{err:#}"));
        }
    }
}

/// Synthetic RGB source for development and tests: a flat scene with a
/// bright block sliding horizontally during `motion_frames`.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_index: u64,
    frame_limit: Option<u64>,
    motion_frames: Option<std::ops::Range<u64>>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
            frame_limit: None,
            motion_frames: None,
        }
    }

    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn with_motion_frames(mut self, range: std::ops::Range<u64>) -> Self {
        self.motion_frames = Some(range);
        self
    }
}

const BLOCK_SIDE: u32 = 40;
const SCENE_LEVEL: u8 = 32;
const BLOCK_LEVEL: u8 = 220;

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(u32, u32)> {
        self.frame_index = 0;
        Ok((self.width, self.height))
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.frame_limit {
            if self.frame_index >= limit {
                return Ok(None);
            }
        }
        let mut data = vec![SCENE_LEVEL; (self.width * self.height * 3) as usize];
        let moving = self
            .motion_frames
            .as_ref()
            .map_or(true, |r| r.contains(&self.frame_index));
        if moving && self.width > BLOCK_SIDE && self.height > BLOCK_SIDE {
            let x0 = (self.frame_index as u32 * 3) % (self.width - BLOCK_SIDE);
            let y0 = (self.height - BLOCK_SIDE) / 2;
            for y in y0..y0 + BLOCK_SIDE {
                for x in x0..x0 + BLOCK_SIDE {
                    let base = ((y * self.width + x) * 3) as usize;
                    data[base..base + 3].fill(BLOCK_LEVEL);
                }
            }
        }
        self.frame_index += 1;
        Ok(Some(Frame::new(data, self.width, self.height, 3)?))
    }
}

/// Factory that treats index 0 as the only attached synthetic device.
pub fn synthetic_factory(width: u32, height: u32, frame_limit: Option<u64>) -> SourceFactory {
    Box::new(move |settings| {
        if settings.camera_index != 0 {
            return Err(NoInputError {
                camera_index: settings.camera_index,
            }
            .into());
        }
        let mut source = SyntheticSource::new(width, height);
        if let Some(limit) = frame_limit {
            source = source.with_frame_limit(limit);
        }
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}
