//! Frame capture: sources and the latest-frame slot.
//!
//! The slot holds at most one frame. A frame published before the engine
//! took the previous one replaces it; the engine never works through a
//! backlog of stale images.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use visifruit::clock::{TimestampUs, now_us};
use visifruit::frame::{BYTES_PER_PIXEL, ChannelOrder, Frame};

use crate::error::EngineError;

/// Produces frames on demand.
///
/// `next_frame` may block (file reads, image decoding); [`run_capture`]
/// calls it on the blocking pool.
pub trait FrameSource: Send {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn next_frame(
        &mut self,
        sequence: u64,
        captured_at_us: TimestampUs,
    ) -> Result<Frame, EngineError>;
}

// ─── Latest-frame slot ──────────────────────────────────────────────

/// Publishing side of the single-frame buffer.
#[derive(Debug)]
pub struct FrameSlot {
    tx: watch::Sender<Option<Frame>>,
}

/// Consuming side. Counts frames that were overwritten before being taken.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Frame>>,
    last_sequence: Option<u64>,
    dropped: u64,
}

impl FrameSlot {
    pub fn new() -> (Self, FrameReceiver) {
        let (tx, rx) = watch::channel(None);
        (
            Self { tx },
            FrameReceiver {
                rx,
                last_sequence: None,
                dropped: 0,
            },
        )
    }

    /// Replace the slot content with a newer frame.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// True once the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FrameReceiver {
    /// Wait for the next unseen frame. `None` once the slot is dropped.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            let latest = self.rx.borrow_and_update().clone();
            let Some(frame) = latest else {
                continue;
            };
            if let Some(last) = self.last_sequence {
                self.dropped += frame.sequence.saturating_sub(last + 1);
            }
            self.last_sequence = Some(frame.sequence);
            return Some(frame);
        }
    }

    /// Frames overwritten since the previous call.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

/// Capture loop: one frame per tick until shutdown or the receiver goes away.
///
/// The capture timestamp is taken at the tick; the source then produces
/// the frame on the blocking pool so decoding never stalls a runtime worker.
pub async fn run_capture<S: FrameSource + 'static>(
    source: S,
    slot: FrameSlot,
    fps: f64,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs_f64(1.0 / fps);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let name = source.name().to_string();
    info!("Capture from {} at {:.1} fps", name, fps);
    let source = Arc::new(Mutex::new(source));

    let mut sequence = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if slot.is_closed() {
                    break;
                }
                let captured_at_us = now_us();
                let src = Arc::clone(&source);
                let produced = tokio::task::spawn_blocking(move || {
                    src.lock().next_frame(sequence, captured_at_us)
                })
                .await;
                match produced {
                    Ok(Ok(frame)) => {
                        slot.publish(frame);
                        sequence += 1;
                    }
                    Ok(Err(e)) => warn!("Capture from {} failed: {}", name, e),
                    Err(e) => {
                        warn!("Capture task for {} aborted: {}", name, e);
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Capture stopped after {} frames", sequence);
}

// ─── Sources ────────────────────────────────────────────────────────

/// Cycles through the PNG/JPEG images of a directory in name order.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    label: String,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl DirectoryFrameSource {
    /// # Errors
    ///
    /// `Source` if the directory cannot be read or holds no images.
    pub fn open(dir: &Path) -> Result<Self, EngineError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| EngineError::Source(format!("{}: {e}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_image(path))
            .collect();
        if files.is_empty() {
            return Err(EngineError::Source(format!(
                "{}: no .png/.jpg images",
                dir.display()
            )));
        }
        files.sort();
        info!("Frame directory {}: {} images", dir.display(), files.len());
        Ok(Self {
            label: dir.display().to_string(),
            files,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
}

impl FrameSource for DirectoryFrameSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn next_frame(
        &mut self,
        sequence: u64,
        captured_at_us: TimestampUs,
    ) -> Result<Frame, EngineError> {
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let image = image::open(path)
            .map_err(|e| EngineError::Source(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Ok(Frame::new(
            sequence,
            captured_at_us,
            width,
            height,
            ChannelOrder::Rgb,
            image.into_raw(),
        )?)
    }
}

/// Uniform belt-coloured frames, for runs without a camera.
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        const BELT_GREY: [u8; 3] = [72, 74, 70];
        let pixels: Vec<u8> = BELT_GREY
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

impl FrameSource for SyntheticFrameSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn next_frame(
        &mut self,
        sequence: u64,
        captured_at_us: TimestampUs,
    ) -> Result<Frame, EngineError> {
        Ok(Frame::new(
            sequence,
            captured_at_us,
            self.width,
            self.height,
            ChannelOrder::Rgb,
            self.pixels.clone(),
        )?)
    }
}
