//! In-process video playback
//!
//! - `source`: the frame source abstraction and frame/metadata types
//! - `probe`: media metadata through `ffprobe`
//! - `ffmpeg`: frame source streaming raw frames from an `ffmpeg` child
//! - `pipeline`: frame source pulling from a GStreamer appsink (`video` feature)
//! - `mailbox`: single-slot newest-wins frame hand-off
//! - `worker`: decode thread state machine
//! - `presenter`: pixel conversion, scale cache and drawing on the display loop
//! - `stats`: rendered/dropped frame counters
//!
//! # Architecture
//!
//! 1. The decode worker thread pulls frames from its source at the source rate
//! 2. Each frame replaces whatever sits in the mailbox
//! 3. The display loop takes the newest frame and hands it to the presenter
//! 4. The presenter converts, scales and writes it into the screen surface

pub mod ffmpeg;
pub mod mailbox;
#[cfg(feature = "video")]
pub mod pipeline;
pub mod presenter;
pub mod probe;
pub mod source;
pub mod stats;
#[cfg(test)]
pub mod testing;
pub mod worker;

use std::sync::Arc;

pub use source::SourceOpener;

/// Pick the decoder named in config (`auto`, `ffmpeg` or `gstreamer`).
///
/// Returns `None` when the requested decoder cannot run on this system.
pub fn select_opener(decoder: &str, ffmpeg: &str, ffprobe: &str) -> Option<Arc<dyn SourceOpener>> {
    let ffmpeg_opener = || {
        let opener = ffmpeg::FfmpegOpener::new(ffmpeg, ffprobe);
        opener
            .is_available()
            .then(|| Arc::new(opener) as Arc<dyn SourceOpener>)
    };

    match decoder {
        "ffmpeg" => ffmpeg_opener(),
        #[cfg(feature = "video")]
        "gstreamer" => match pipeline::initialize_gstreamer() {
            Ok(()) => Some(Arc::new(pipeline::GstOpener)),
            Err(e) => {
                log::warn!("{:#}", e);
                None
            }
        },
        #[cfg(not(feature = "video"))]
        "gstreamer" => {
            log::warn!("GStreamer decoding not compiled (build with --features video to enable)");
            None
        }
        _ => {
            #[cfg(feature = "video")]
            if pipeline::initialize_gstreamer().is_ok() {
                return Some(Arc::new(pipeline::GstOpener));
            }
            ffmpeg_opener()
        }
    }
}
