//! Media metadata via `ffprobe`

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};

/// What `ffprobe` reports about the first video stream of a file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Frame count from the container, or estimated from duration
    pub total_frames: u64,
    pub duration_secs: f64,
    pub codec: Option<String>,
    pub container: Option<String>,
    /// Display rotation in degrees, normalised to 0, 90, 180 or 270
    pub rotation: u32,
}

impl MediaProbe {
    /// Picture size after rotation, which is what ffmpeg emits since it
    /// auto-rotates by default
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation % 180 == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
    tags: Option<StreamTags>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StreamTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

/// Check whether a tool answers `-version`
pub fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `ffprobe` on a file and parse its JSON report
pub fn probe(ffprobe: &str, path: &Path) -> Result<MediaProbe> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute {}", ffprobe))?;

    if !output.status.success() {
        anyhow::bail!("{} returned {} for {}", ffprobe, output.status, path.display());
    }

    parse_probe_json(&output.stdout)
}

fn parse_probe_json(json: &[u8]) -> Result<MediaProbe> {
    let report: ProbeOutput =
        serde_json::from_slice(json).context("Failed to parse ffprobe JSON")?;

    let stream = report
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .context("No video stream found")?;

    let width = stream.width.context("Missing width")?;
    let height = stream.height.context("Missing height")?;

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .map(parse_frame_rate)
        .filter(|fps| *fps > 0.0)
        .or_else(|| stream.r_frame_rate.as_deref().map(parse_frame_rate))
        .unwrap_or(0.0);

    let duration_secs = report
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration_secs * frame_rate).round().max(0.0) as u64);

    // Display matrix first, then the legacy `rotate` tag of older muxers
    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|d| d.rotation)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.parse::<f64>().ok())
        })
        .map(normalize_rotation)
        .unwrap_or(0);

    Ok(MediaProbe {
        width,
        height,
        frame_rate,
        total_frames,
        duration_secs,
        codec: stream.codec_name.clone(),
        container: report.format.and_then(|f| f.format_name),
        rotation,
    })
}

/// Snap to a quarter turn in `0..360`
fn normalize_rotation(degrees: f64) -> u32 {
    let quarter = (degrees / 90.0).round() as i64;
    (quarter.rem_euclid(4) * 90) as u32
}

/// Parse ffprobe rates like `30000/1001`; zero when unparseable
pub fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(0.0);
        let d: f64 = den.parse().unwrap_or(0.0);
        if d > 0.0 { n / d } else { 0.0 }
    } else {
        rate.parse().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("garbage"), 0.0);
    }

    #[test]
    fn test_parse_probe_json() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
                 "r_frame_rate": "25/1", "avg_frame_rate": "25/1", "nb_frames": "250"}
            ],
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.000000"}
        }"#;

        let probe = parse_probe_json(json).unwrap();
        assert_eq!((probe.width, probe.height), (1280, 720));
        assert_eq!(probe.frame_rate, 25.0);
        assert_eq!(probe.total_frames, 250);
        assert_eq!(probe.duration_secs, 10.0);
        assert_eq!(probe.codec.as_deref(), Some("h264"));
        assert_eq!(probe.container.as_deref(), Some("mov,mp4,m4a,3gp,3g2,mj2"));
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360,
                         "r_frame_rate": "30/1", "avg_frame_rate": "0/0"}],
            "format": {"duration": "2.5"}
        }"#;

        let probe = parse_probe_json(json).unwrap();
        assert_eq!(probe.frame_rate, 30.0);
        assert_eq!(probe.total_frames, 75);
    }

    #[test]
    fn test_rotated_phone_clip_swaps_display_size() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 1920, "height": 1080,
                         "avg_frame_rate": "30/1",
                         "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}],
            "format": {"duration": "1.0"}
        }"#;

        let probe = parse_probe_json(json).unwrap();
        assert_eq!(probe.rotation, 270);
        assert_eq!((probe.width, probe.height), (1920, 1080));
        assert_eq!(probe.display_size(), (1080, 1920));
    }

    #[test]
    fn test_legacy_rotate_tag() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "avg_frame_rate": "25/1", "tags": {"rotate": "180"}}],
            "format": {}
        }"#;

        let probe = parse_probe_json(json).unwrap();
        assert_eq!(probe.rotation, 180);
        assert_eq!(probe.display_size(), (640, 480));
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0.0), 0);
        assert_eq!(normalize_rotation(90.0), 90);
        assert_eq!(normalize_rotation(-90.0), 270);
        assert_eq!(normalize_rotation(-180.0), 180);
        assert_eq!(normalize_rotation(450.0), 90);
    }

    #[test]
    fn test_probe_without_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(parse_probe_json(json).is_err());
    }
}
