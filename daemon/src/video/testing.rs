//! Synthetic frame sources for pipeline tests

use anyhow::Result;
use common::DisplayError;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::source::{Frame, FrameSource, PixelFormat, SourceOpener, VideoInfo};

/// Opens every path into a [`PatternSource`] with fixed properties
#[derive(Clone)]
pub struct PatternOpener {
    frames: u64,
    fps: f64,
    width: u32,
    height: u32,
    open_delay: Duration,
    frame_delay: Duration,
    fail_open: bool,
    fail_at: Option<u64>,
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl PatternOpener {
    pub fn new(frames: u64, fps: f64) -> Self {
        Self {
            frames,
            fps,
            width: 16,
            height: 8,
            open_delay: Duration::ZERO,
            frame_delay: Duration::ZERO,
            fail_open: false,
            fail_at: None,
            live: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Every `next_frame` call blocks this long
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Decoding frame `index` fails
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Sources opened and not yet dropped
    pub fn live_sources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened_sources(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SourceOpener for PatternOpener {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DisplayError> {
        std::thread::sleep(self.open_delay);
        if self.fail_open {
            return Err(DisplayError::UnreadableFile(format!(
                "{} cannot be opened",
                path.display()
            )));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(PatternSource {
            info: VideoInfo {
                path: path.to_path_buf(),
                total_frames: self.frames,
                frame_rate: self.fps,
                duration_secs: if self.fps > 0.0 {
                    self.frames as f64 / self.fps
                } else {
                    0.0
                },
                width: self.width,
                height: self.height,
            },
            next: 0,
            frame_delay: self.frame_delay,
            fail_at: self.fail_at,
            live: Arc::clone(&self.live),
        }))
    }
}

/// Solid RGB frames whose colour encodes the frame index
pub struct PatternSource {
    info: VideoInfo,
    next: u64,
    frame_delay: Duration,
    fail_at: Option<u64>,
    live: Arc<AtomicUsize>,
}

impl FrameSource for PatternSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        std::thread::sleep(self.frame_delay);

        if self.fail_at == Some(self.next) {
            anyhow::bail!("corrupt packet at frame {}", self.next);
        }
        if self.next >= self.info.total_frames {
            return Ok(None);
        }

        let shade = (self.next % 256) as u8;
        let pixels = (self.info.width * self.info.height) as usize;
        let frame = Frame {
            data: [shade, 0, 255 - shade].repeat(pixels),
            width: self.info.width,
            height: self.info.height,
            format: PixelFormat::Rgb8,
            index: self.next,
        };
        self.next += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        self.next = index;
        Ok(())
    }
}

impl Drop for PatternSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
