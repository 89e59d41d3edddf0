//! Frame source backed by an `ffmpeg` subprocess
//!
//! Metadata comes from `ffprobe`. Frames are streamed as raw `rgb24` over
//! the child's stdout, one `read_exact` per frame. Seeking restarts the
//! child with an input-side `-ss` offset.

use anyhow::{Context, Result};
use common::DisplayError;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::probe;
use super::source::{Frame, FrameSource, PixelFormat, SourceOpener, VideoInfo};

/// Opens files with `ffprobe` + `ffmpeg`
pub struct FfmpegOpener {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegOpener {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Both tools answer `-version`
    pub fn is_available(&self) -> bool {
        probe::tool_available(&self.ffprobe) && probe::tool_available(&self.ffmpeg)
    }
}

impl SourceOpener for FfmpegOpener {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DisplayError> {
        let source = FfmpegSource::open(&self.ffmpeg, &self.ffprobe, path)?;
        Ok(Box::new(source))
    }
}

pub struct FfmpegSource {
    info: VideoInfo,
    ffmpeg: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    next_index: u64,
    frame_len: usize,
}

impl FfmpegSource {
    pub fn open(ffmpeg: &str, ffprobe: &str, path: &Path) -> Result<Self, DisplayError> {
        if !probe::tool_available(ffprobe) {
            return Err(DisplayError::BackendUnavailable(format!(
                "{} is not installed",
                ffprobe
            )));
        }

        let media = probe::probe(ffprobe, path)
            .map_err(|e| DisplayError::UnreadableFile(format!("{}: {:#}", path.display(), e)))?;

        if media.width == 0 || media.height == 0 {
            return Err(DisplayError::UnreadableFile(format!(
                "{} reports an empty picture size",
                path.display()
            )));
        }

        let (width, height) = media.display_size();
        let info = VideoInfo {
            path: path.to_path_buf(),
            total_frames: media.total_frames,
            frame_rate: media.frame_rate,
            duration_secs: media.duration_secs,
            width,
            height,
        };

        log::info!(
            "Probed {}: {}x{} @ {:.2} fps, {} frames ({}, rotated {}°)",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.total_frames,
            media.codec.as_deref().unwrap_or("unknown codec"),
            media.rotation
        );

        let frame_len = info.width as usize * info.height as usize * PixelFormat::Rgb8.bytes_per_pixel();
        let mut source = Self {
            info,
            ffmpeg: ffmpeg.to_string(),
            child: None,
            stdout: None,
            next_index: 0,
            frame_len,
        };
        source
            .spawn_at(0)
            .map_err(|e| DisplayError::BackendUnavailable(format!("{:#}", e)))?;

        Ok(source)
    }

    fn spawn_at(&mut self, index: u64) -> Result<()> {
        self.kill_child();

        let offset = index as f64 * self.info.frame_interval().as_secs_f64();
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(decode_args(&self.info, offset))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.ffmpeg))?;
        self.stdout = Some(child.stdout.take().context("ffmpeg: no stdout pipe")?);
        self.child = Some(child);
        self.next_index = index;

        log::debug!("ffmpeg decoding {} from frame {}", self.info.path.display(), index);
        Ok(())
    }

    fn kill_child(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Arguments streaming `info.path` from `offset` seconds as `rgb24`
/// frames of `info.width` x `info.height`.
///
/// The output size is pinned with `-s` so every frame is exactly
/// `width * height * 3` bytes even if the rotation metadata was not
/// reported by ffprobe.
fn decode_args(info: &VideoInfo, offset: f64) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "quiet", "-nostdin"].map(OsString::from).to_vec();
    if offset > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", offset).into());
    }
    args.push("-i".into());
    args.push(info.path.clone().into_os_string());
    for arg in ["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"] {
        args.push(arg.into());
    }
    args.push(format!("{}x{}", info.width, info.height).into());
    args.push("pipe:1".into());
    args
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; self.frame_len];
        match stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.kill_child();
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to read frame from ffmpeg"),
        }

        let frame = Frame {
            data,
            width: self.info.width,
            height: self.info.height,
            format: PixelFormat::Rgb8,
            index: self.next_index,
        };
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        self.spawn_at(index)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill_child();
    }
}
