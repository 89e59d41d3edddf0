//! GStreamer frame source
//!
//! Decodes through `decodebin` into BGRA and pulls samples from an appsink
//! on demand, so the decode worker keeps control of pacing.

use anyhow::{Context, Result};
use common::DisplayError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;

use super::source::{Frame, FrameSource, PixelFormat, SourceOpener, VideoInfo};

/// Initialize GStreamer once per process
pub fn initialize_gstreamer() -> Result<()> {
    static GSTREAMER_INIT: std::sync::OnceLock<Result<(), String>> = std::sync::OnceLock::new();

    GSTREAMER_INIT
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to initialize GStreamer: {}", e))
}

/// Build a decode pipeline ending in an appsink named `sink`
pub fn build_pipeline(path: &Path) -> Result<(gst::Pipeline, gst_app::AppSink)> {
    log::info!("Creating GStreamer pipeline for: {}", path.display());

    let pipeline_str = format!(
        "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=BGRA ! appsink name=sink",
        path.display()
    );

    log::debug!("GStreamer pipeline: {}", pipeline_str);

    let pipeline = gst::parse::launch(&pipeline_str)
        .context("Failed to create GStreamer pipeline")?
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| anyhow::anyhow!("Pipeline is not a gst::Pipeline"))?;

    let app_sink = pipeline
        .by_name("sink")
        .context("Failed to get appsink from pipeline")?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| anyhow::anyhow!("sink is not an AppSink"))?;

    configure_app_sink(&app_sink);
    Ok((pipeline, app_sink))
}

/// Pull-mode appsink: no clock sync, the worker paces playback
fn configure_app_sink(app_sink: &gst_app::AppSink) {
    app_sink.set_property("emit-signals", false);
    app_sink.set_property("sync", false);
    app_sink.set_property("max-buffers", 2u32);
    app_sink.set_property("drop", false);
}

/// How long the pipeline may take to produce its first frame
const PREROLL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);
/// How long a pull may wait before the decoder counts as stalled
const PULL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(2);

pub struct GstOpener;

impl SourceOpener for GstOpener {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DisplayError> {
        initialize_gstreamer().map_err(|e| DisplayError::BackendUnavailable(format!("{:#}", e)))?;
        let source = GstSource::open(path)
            .map_err(|e| DisplayError::UnreadableFile(format!("{}: {:#}", path.display(), e)))?;
        Ok(Box::new(source))
    }
}

pub struct GstSource {
    info: VideoInfo,
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    next_index: u64,
}

impl GstSource {
    pub fn open(path: &Path) -> Result<Self> {
        let (pipeline, app_sink) = build_pipeline(path)?;

        let prerolled = pipeline
            .set_state(gst::State::Paused)
            .context("Failed to preroll pipeline")
            .and_then(|_| preroll(&pipeline, &app_sink));
        let preroll = match prerolled {
            Ok(sample) => sample,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };
        let caps = preroll.caps().context("Prerolled sample has no caps")?;
        let video_info =
            gst_video::VideoInfo::from_caps(caps).context("Failed to read video caps")?;

        let fps = video_info.fps();
        let frame_rate = if fps.denom() > 0 {
            fps.numer() as f64 / fps.denom() as f64
        } else {
            0.0
        };
        let duration_secs = pipeline
            .query_duration::<gst::ClockTime>()
            .map(|d| d.nseconds() as f64 / 1_000_000_000.0)
            .unwrap_or(0.0);
        let total_frames = (duration_secs * frame_rate).round().max(0.0) as u64;

        log::info!(
            "Detected video: {}x{} @ {:.2} fps, {} frames",
            video_info.width(),
            video_info.height(),
            frame_rate,
            total_frames
        );

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start pipeline")?;

        Ok(Self {
            info: VideoInfo {
                path: path.to_path_buf(),
                total_frames,
                frame_rate,
                duration_secs,
                width: video_info.width(),
                height: video_info.height(),
            },
            pipeline,
            app_sink,
            next_index: 0,
        })
    }

    fn sample_to_frame(&self, sample: &gst::Sample) -> Result<Frame> {
        let buffer = sample.buffer().context("Sample without buffer")?;
        let map = buffer
            .map_readable()
            .map_err(|_| anyhow::anyhow!("Failed to map buffer"))?;

        Ok(Frame {
            data: map.as_slice().to_vec(),
            width: self.info.width,
            height: self.info.height,
            format: PixelFormat::Bgra8,
            index: self.next_index,
        })
    }
}

/// Wait a bounded time for the first frame
fn preroll(pipeline: &gst::Pipeline, app_sink: &gst_app::AppSink) -> Result<gst::Sample> {
    app_sink.try_pull_preroll(PREROLL_TIMEOUT).ok_or_else(|| {
        match bus_error(pipeline) {
            Some(message) => anyhow::anyhow!("Pipeline failed: {}", message),
            None => anyhow::anyhow!(
                "Pipeline produced no frame within {}s",
                PREROLL_TIMEOUT.seconds()
            ),
        }
    })
}

/// First error posted on the pipeline bus, if any
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
        gst::MessageView::Error(err) => Some(err.error().to_string()),
        _ => None,
    }
}

impl FrameSource for GstSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        // The prerolled buffer is the first one pulled after going to Playing
        let sample = match self.app_sink.try_pull_sample(PULL_TIMEOUT) {
            Some(sample) => sample,
            None if self.app_sink.is_eos() => return Ok(None),
            None => anyhow::bail!(
                "No frame within {}ms: {}",
                PULL_TIMEOUT.mseconds(),
                bus_error(&self.pipeline).unwrap_or_else(|| "decoder stalled".to_string())
            ),
        };

        let frame = self.sample_to_frame(&sample)?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        let position = self.info.frame_interval().as_nanos() as u64 * index;
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::ClockTime::from_nseconds(position),
            )
            .context("Failed to seek pipeline")?;
        self.next_index = index;
        Ok(())
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop GStreamer pipeline: {}", e);
        }
    }
}
