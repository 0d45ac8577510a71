//! End-to-end flow: synthetic capture through the pipeline into the
//! movement tracker, driven by a synthetic clock where timing matters.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use motion_kernel::feed::{synthetic_factory, FeedSettings, SourceFeed};
use motion_kernel::pipeline::{FramePipeline, PipelineControl, PipelineSettings};
use motion_kernel::scheduler::StopToken;
use motion_kernel::tracker::{MovementTracker, TrackerParams, TrackerState};
use motion_kernel::Frame;

fn free_token() -> StopToken {
    StopToken::from_flag(Arc::new(AtomicBool::new(false)))
}

fn test_pipeline() -> (FramePipeline, PipelineControl, mpsc::Receiver<bool>) {
    let control = PipelineControl::new();
    let settings = PipelineSettings {
        // The synthetic block is 40x40 before resize; keep the area gate
        // below its post-morphology footprint.
        min_contour_area: 300,
        ..PipelineSettings::default()
    };
    let mut pipeline = FramePipeline::new(settings, control.clone());
    let (tx, rx) = mpsc::channel();
    pipeline.motion_detected.connect_sender(tx);
    (pipeline, control, rx)
}

#[test]
fn synthetic_feed_drives_motion_detection() {
    let mut feed = SourceFeed::new(
        FeedSettings {
            camera_index: 0,
            working_width: 200,
        },
        synthetic_factory(640, 480, Some(40)),
    );
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>();
    feed.frame_published.connect_sender(frame_tx);
    feed.run(free_token());

    let (mut pipeline, _control, motion_rx) = test_pipeline();
    for frame in frame_rx.try_iter() {
        pipeline.on_frame(frame);
    }

    let votes: Vec<bool> = motion_rx.try_iter().collect();
    assert_eq!(votes.len(), 40);
    // The first frame seeds the background; the sliding block must show up
    // as motion on later frames.
    assert!(votes.iter().skip(1).any(|&m| m));
}

#[test]
fn pipeline_and_tracker_confirm_then_release() {
    let (mut pipeline, _control, motion_rx) = test_pipeline();
    let mut tracker = MovementTracker::new(TrackerParams {
        present_threshold: Duration::from_millis(1_000),
        absence_threshold: Duration::from_millis(400),
        tolerance: Duration::from_millis(200),
    });
    let (event_tx, event_rx) = mpsc::channel();
    tracker.continuous_movement.connect_sender(event_tx);

    let mut feed = SourceFeed::new(
        FeedSettings {
            camera_index: 0,
            working_width: 200,
        },
        synthetic_factory(640, 480, Some(120)),
    );
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>();
    feed.frame_published.connect_sender(frame_tx);
    feed.run(free_token());

    // Feed 120 frames at a simulated 30 fps: 0..2s moving block, then a
    // still scene for the remaining 2s.
    let frames: Vec<Frame> = frame_rx.try_iter().collect();
    assert_eq!(frames.len(), 120);
    let t0 = Instant::now();
    for (i, frame) in frames.into_iter().enumerate() {
        let still = i >= 60;
        let frame = if still { quiet_like(&frame) } else { frame };
        pipeline.on_frame(frame);
        let now = t0 + Duration::from_millis(i as u64 * 33);
        for motion in motion_rx.try_iter() {
            tracker.on_sample(motion, now);
        }
    }
    // Let the absence timer run out past the end of the feed.
    tracker.poll_timers(t0 + Duration::from_millis(120 * 33 + 500));

    let events: Vec<bool> = event_rx.try_iter().collect();
    assert_eq!(events, vec![true, false]);
    assert_eq!(tracker.state(), TrackerState::Idle);
}

#[test]
fn reconfigure_rebuilds_background_model() {
    let (mut pipeline, control, motion_rx) = test_pipeline();

    let mut feed = SourceFeed::new(
        FeedSettings {
            camera_index: 0,
            working_width: 200,
        },
        synthetic_factory(640, 480, Some(10)),
    );
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>();
    feed.frame_published.connect_sender(frame_tx);
    feed.run(free_token());
    let frames: Vec<Frame> = frame_rx.try_iter().collect();

    for frame in &frames {
        pipeline.on_frame(frame.clone());
    }
    let _ = motion_rx.try_iter().count();

    // After reconfiguration the background model is fresh: the first frame
    // seeds it, so an unchanged scene reports no motion.
    control.reconfigure(PipelineSettings {
        min_contour_area: 300,
        ..PipelineSettings::default()
    });
    pipeline.on_frame(frames[0].clone());
    assert!(!motion_rx.try_recv().unwrap());
}

#[test]
fn viewer_mailbox_sees_only_latest_feed_frame() {
    let slot = motion_kernel::SubscriberSlot::new();
    let mut feed = SourceFeed::new(
        FeedSettings {
            camera_index: 0,
            working_width: 100,
        },
        synthetic_factory(640, 480, Some(8)),
    );
    {
        let slot = slot.clone();
        feed.frame_published.connect(move |frame| slot.offer(frame));
    }
    feed.run(free_token());

    // Eight frames were offered but never drained; only the newest remains.
    let frame = slot.take().expect("one pending frame");
    assert_eq!(frame.width, 100);
    assert!(slot.take().is_none());
}

fn quiet_like(frame: &Frame) -> Frame {
    Frame::new(
        vec![32u8; frame.as_bytes().len()],
        frame.width,
        frame.height,
        frame.channels,
    )
    .unwrap()
}
