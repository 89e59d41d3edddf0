//! Frame sources for in-process playback
//!
//! A [`FrameSource`] hands out decoded frames one at a time and can be
//! repositioned by frame index. Sources are opened through a
//! [`SourceOpener`] so the decode worker never needs to know which decoder
//! sits behind it.

use anyhow::Result;
use common::DisplayError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Frame rate used for pacing when a source reports none
pub const FALLBACK_FPS: f64 = 30.0;

/// Byte layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Bgr8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
            Self::Bgr8 | Self::Rgb8 => 3,
        }
    }
}

/// One decoded picture
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub index: u64,
}

/// Metadata captured when a source opens a file
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub total_frames: u64,
    pub frame_rate: f64,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// Delay between two frames when pacing playback
    pub fn frame_interval(&self) -> Duration {
        frame_interval(self.frame_rate)
    }
}

/// `1000 / fps` milliseconds, falling back to 30 fps for zero, negative or
/// non-finite rates.
pub fn frame_interval(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        FALLBACK_FPS
    };
    Duration::from_secs_f64(1.0 / fps)
}

/// A stream of decoded frames.
///
/// Sources release their decoder resources when dropped.
pub trait FrameSource: Send {
    fn info(&self) -> &VideoInfo;

    /// Decode the next frame, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Reposition so the next decoded frame is `index`
    fn seek(&mut self, index: u64) -> Result<()>;
}

/// Opens files into frame sources.
///
/// Errors use the shared taxonomy so the cascade can report why a file
/// could not be played in-process.
pub trait SourceOpener: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DisplayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(10.0), Duration::from_millis(100));
        assert_eq!(frame_interval(25.0), Duration::from_millis(40));
    }

    #[test]
    fn test_frame_interval_fallback() {
        let fallback = Duration::from_secs_f64(1.0 / 30.0);
        assert_eq!(frame_interval(0.0), fallback);
        assert_eq!(frame_interval(-5.0), fallback);
        assert_eq!(frame_interval(f64::NAN), fallback);
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
    }
}
