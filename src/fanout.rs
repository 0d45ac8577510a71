//! Network frame fanout.
//!
//! Each connected viewer gets its own streamer worker and a single-slot
//! mailbox. The capture side offers every frame to every mailbox; a slot
//! that already holds an unsent frame is overwritten, so slow viewers see
//! the freshest frame rather than a growing backlog. Streamers tick at
//! roughly 30 fps, JPEG-encode the slot contents, and write them with a
//! 4-byte little-endian length prefix.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;
use crate::scheduler::{lock_unpoisoned, StopToken};
use crate::signal::Signal;

/// Streamer tick period, roughly 30 frames per second.
pub const FRAME_SEND_INTERVAL: Duration = Duration::from_millis(33);

const JPEG_QUALITY: u8 = 80;

/// Single-slot latest-wins mailbox between the capture side and one
/// streamer.
#[derive(Clone, Default)]
pub struct SubscriberSlot {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl SubscriberSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a frame in the slot, replacing any unsent one.
    pub fn offer(&self, frame: Frame) {
        *lock_unpoisoned(&self.slot) = Some(frame);
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<Frame> {
        lock_unpoisoned(&self.slot).take()
    }
}

/// JPEG-encode a frame. Grayscale and RGB frames encode as-is.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let color = match frame.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        other => anyhow::bail!("unsupported channel count for jpeg encode: {other}"),
    };
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode(frame.as_bytes(), frame.width, frame.height, color)
        .context("jpeg encode failed")?;
    Ok(buf)
}

/// Write one length-prefixed message: u32 little-endian payload size, then
/// the payload.
pub fn write_framed(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .context("writing frame length")?;
    stream.write_all(payload).context("writing frame payload")?;
    stream.flush().context("flushing frame")?;
    Ok(())
}

/// One viewer connection: drains its mailbox on a fixed tick and streams
/// encoded frames until the connection drops or the token fires.
pub struct FrameStreamer {
    id: String,
    stream: TcpStream,
    slot: SubscriberSlot,
    pub connection_terminated: Signal<String>,
}

impl FrameStreamer {
    pub fn new(stream: TcpStream, slot: SubscriberSlot) -> Self {
        Self {
            id: format!("sub-{:08x}", rand::random::<u32>()),
            stream,
            slot,
            connection_terminated: Signal::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run(&mut self, token: StopToken) {
        log::info!("streamer {} started", self.id);
        while !token.is_stopped() {
            let tick_started = Instant::now();
            if let Some(frame) = self.slot.take() {
                if let Err(err) = self.send_frame(&frame) {
                    log::warn!("streamer {} terminated: {err:#}", self.id);
                    self.connection_terminated.emit(self.id.clone());
                    return;
                }
            }
            let elapsed = tick_started.elapsed();
            if elapsed < FRAME_SEND_INTERVAL {
                std::thread::sleep(FRAME_SEND_INTERVAL - elapsed);
            }
        }
        log::info!("streamer {} stopped", self.id);
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let payload = encode_jpeg(frame)?;
        write_framed(&mut self.stream, &payload)
    }
}

/// Nonblocking accept loop front end for viewer connections.
pub struct StreamServer {
    listener: TcpListener,
}

impl StreamServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("binding stream server to {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("setting stream listener nonblocking")?;
        log::info!("stream server listening on {addr}");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().context("stream server address")
    }

    /// Accept one pending connection if there is one.
    pub fn poll_accept(&self) -> Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                log::info!("viewer connected from {peer}");
                Ok(Some(stream))
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err).context("accepting viewer connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::AtomicBool;

    fn gray_frame(value: u8) -> Frame {
        Frame::from_gray(vec![value; 16 * 16], 16, 16).unwrap()
    }

    #[test]
    fn slot_keeps_only_latest_frame() {
        let slot = SubscriberSlot::new();
        slot.offer(gray_frame(1));
        slot.offer(gray_frame(2));

        let taken = slot.take().unwrap();
        assert_eq!(taken.as_bytes()[0], 2);
        assert!(slot.take().is_none());
    }

    #[test]
    fn encode_jpeg_produces_jpeg_magic() {
        let payload = encode_jpeg(&gray_frame(128)).unwrap();
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_jpeg_rejects_unsupported_channels() {
        let frame = Frame::new(vec![0u8; 4 * 4 * 4], 4, 4, 4).unwrap();
        assert!(encode_jpeg(&frame).is_err());
    }

    #[test]
    fn framed_write_prefixes_length_little_endian() {
        let mut buf = Vec::new();
        write_framed(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &5u32.to_le_bytes());
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn streamer_delivers_framed_jpeg_over_tcp() {
        let server = StreamServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let accepted = loop {
            if let Some(stream) = server.poll_accept().unwrap() {
                break stream;
            }
            std::thread::sleep(Duration::from_millis(5));
        };

        let slot = SubscriberSlot::new();
        slot.offer(gray_frame(128));

        let flag = Arc::new(AtomicBool::new(false));
        let token = StopToken::from_flag(flag.clone());
        let mut streamer = FrameStreamer::new(accepted, slot.clone());
        let handle = std::thread::spawn(move || streamer.run(token));

        let mut reader = client;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).unwrap();
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).unwrap();
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);

        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn dropped_viewer_emits_termination() {
        let server = StreamServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let accepted = loop {
            if let Some(stream) = server.poll_accept().unwrap() {
                break stream;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        drop(client);

        let slot = SubscriberSlot::new();
        let mut streamer = FrameStreamer::new(accepted, slot.clone());
        let (term_tx, term_rx) = std::sync::mpsc::channel();
        streamer.connection_terminated.connect_sender(term_tx);
        let expected_id = streamer.id().to_string();

        let flag = Arc::new(AtomicBool::new(false));
        let token = StopToken::from_flag(flag.clone());
        let handle = std::thread::spawn(move || {
            // Keep offering frames so the streamer hits the broken pipe.
            // The flag is a backstop so the test fails instead of hanging.
            for _ in 0..200 {
                slot.offer(gray_frame(10));
                std::thread::sleep(Duration::from_millis(5));
            }
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        let mut run_streamer = streamer;
        run_streamer.run(token);

        let id = term_rx.try_recv().unwrap();
        assert_eq!(id, expected_id);
        handle.join().unwrap();
    }

    #[test]
    fn poll_accept_returns_none_when_no_connection_pending() {
        let server = StreamServer::bind("127.0.0.1:0").unwrap();
        assert!(server.poll_accept().unwrap().is_none());
    }
}
