//! Common types and utilities for Marquee.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the display daemon (`marquee`) and the
//! controller (`mqctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages, one per line. The client sends [`Command`] variants and receives
//! [`Response`] variants. A client that sends [`Command::Watch`] keeps the
//! connection open and receives a stream of [`Response::Event`] lines.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, Content};
//!
//! // Show a looping video on the second screen
//! let cmd = Command::SetContent {
//!     screen: "screen-2".to_string(),
//!     content: Content::Video("/srv/signage/lobby.mp4".to_string()),
//!     scale: None,
//! };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared between client and daemon.
///
/// The first seven variants describe why a piece of content could not be
/// played; the rest are plumbing failures. All errors are serializable for
/// transmission over IPC.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unreadable file: {0}")]
    UnreadableFile(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Process launch failure: {0}")]
    ProcessLaunchFailure(String),

    #[error("Startup timeout: {0}")]
    StartupTimeout(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown screen: {0}")]
    UnknownScreen(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for DisplayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DisplayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Commands sent from client to daemon via IPC.
///
/// Every command that targets a screen names it by [`ScreenInfo::name`].
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Replace whatever a screen shows with new content.
    ///
    /// For video content the response is sent once the backend cascade has
    /// settled, so it carries the winning backend and the attempt log.
    SetContent {
        screen: String,
        content: Content,
        /// Scaling for image content, ignored for other kinds
        scale: Option<ScaleMode>,
    },
    /// Remove the content from a screen, keeping its surface
    Clear { screen: String },
    /// Switch a screen surface to borderless fullscreen
    EnterFullscreen { screen: String },
    /// Restore the windowed chrome on a screen surface
    ExitFullscreen { screen: String },
    /// Tear down content and release the surface (idempotent)
    Close { screen: String },
    /// Pause in-process video playback
    Pause { screen: String },
    /// Resume in-process video playback
    Resume { screen: String },
    /// Reposition in-process video playback to a frame index
    Seek { screen: String, frame: u64 },
    /// Run one of the remedies offered by the diagnostic view
    RunRemedy { screen: String, remedy: Remedy },
    /// Query daemon status
    Query,
    /// List configured screens
    ListScreens,
    /// Store the current per-screen content as a named profile
    SaveProfile { name: String },
    /// Apply every assignment stored in a profile
    ApplyProfile { name: String },
    /// List stored profile names
    ListProfiles,
    /// Delete a stored profile
    DeleteProfile { name: String },
    /// Subscribe to content notifications on this connection
    Watch,
    /// Ping the daemon
    Ping,
    /// Shut the daemon down, tearing down every session
    Kill,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(DisplayError),
    Applied(ApplyReport),
    Status(DaemonStatus),
    Screens(Vec<ScreenInfo>),
    Profiles(Vec<String>),
    Event(ContentEvent),
    Pong,
}

/// Content that can be mounted on a screen.
///
/// The payload is a message for text, a file path for images and videos,
/// and a URL for web content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Image(String),
    Video(String),
    Web(String),
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Image(_) => ContentKind::Image,
            Self::Video(_) => ContentKind::Video,
            Self::Web(_) => ContentKind::Web,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Self::Text(s) | Self::Image(s) | Self::Video(s) | Self::Web(s) => s,
        }
    }

    /// Short human readable description, used in notifications and logs.
    ///
    /// Paths are reduced to their file name and text is truncated to 40
    /// characters.
    ///
    /// ```
    /// use common::Content;
    ///
    /// let content = Content::Video("/srv/media/intro.mp4".to_string());
    /// assert_eq!(content.summary(), "intro.mp4");
    /// ```
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => {
                let mut short: String = text.chars().take(40).collect();
                if text.chars().count() > 40 {
                    short.push('…');
                }
                short
            }
            Self::Image(path) | Self::Video(path) => std::path::Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone()),
            Self::Web(url) => url.clone(),
        }
    }
}

/// Kind of content, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Web,
}

impl ContentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Web => "web",
        }
    }
}

/// Playback strategies, listed in cascade priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Decode thread + frame presenter inside the daemon
    InProcess,
    /// A dedicated media player process (VLC, mpv, ...)
    ExternalPlayer,
    /// Whatever the operating system opens the file with
    SystemDefault,
    /// A generated HTML5 player page in a web engine process
    WebEmbedded,
}

impl BackendKind {
    /// Every variant, highest priority first
    pub const CASCADE: [BackendKind; 4] = [
        Self::InProcess,
        Self::ExternalPlayer,
        Self::SystemDefault,
        Self::WebEmbedded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::ExternalPlayer => "external-player",
            Self::SystemDefault => "system-default",
            Self::WebEmbedded => "web",
        }
    }

    /// Parse a backend name as written in config files
    pub fn from_name(name: &str) -> Option<Self> {
        Self::CASCADE.into_iter().find(|kind| kind.name() == name)
    }
}

/// Result of trying one backend during a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Failure,
    NotAttempted,
}

/// One record per backend tried while starting a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAttempt {
    pub backend: BackendKind,
    pub outcome: AttemptOutcome,
    pub message: Option<String>,
}

/// Decode worker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
    Error,
}

/// Snapshot of an in-process playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub position: u64,
    pub total_frames: u64,
    pub frame_rate: f64,
    pub duration_secs: f64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
}

/// Physical screen geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

/// What a screen is currently showing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenStatus {
    pub screen: String,
    pub content: Option<Content>,
    pub backend: Option<BackendKind>,
    pub fullscreen: bool,
    /// The surface is closed and has no buffer
    pub closed: bool,
    /// Every backend failed and the diagnostic view is shown
    pub diagnostic: bool,
    pub playback: Option<PlaybackStatus>,
    pub attempts: Vec<BackendAttempt>,
}

/// Daemon status information
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub backends: Vec<BackendKind>,
    pub screens: Vec<ScreenStatus>,
}

/// Outcome of a `SetContent` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub screen: String,
    pub kind: ContentKind,
    /// Backend that ended up playing the content (video and web only)
    pub backend: Option<BackendKind>,
    pub attempts: Vec<BackendAttempt>,
    /// Every backend failed and the diagnostic view is shown instead
    pub diagnostic: bool,
}

/// Notification emitted whenever a screen's content changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEvent {
    Applied {
        screen: String,
        kind: ContentKind,
        summary: String,
    },
    Cleared {
        screen: String,
    },
}

/// Actions offered by the diagnostic view of a failed video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remedy {
    /// Show the file in the platform file browser
    RevealInFileBrowser,
    /// Hand the file to the OS default application
    OpenWithDefault,
    /// Run the configured repair/transcode tool on the file
    RepairTool,
}

/// Image scaling/fitting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleMode {
    /// Center image without scaling
    Center,
    /// Scale to fill entire surface (may crop)
    Fill,
    /// Scale to fit within surface (may have letterboxing)
    #[default]
    Fit,
    /// Stretch to fill surface (may distort)
    Stretch,
    /// Tile the image
    Tile,
}

impl ScaleMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "center" => Some(Self::Center),
            "fill" => Some(Self::Fill),
            "fit" => Some(Self::Fit),
            "stretch" => Some(Self::Stretch),
            "tile" => Some(Self::Tile),
            _ => None,
        }
    }
}

/// IPC socket path helper
///
/// `MARQUEE_SOCKET` overrides the default location inside the runtime dir.
pub fn get_socket_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("MARQUEE_SOCKET") {
        return std::path::PathBuf::from(path);
    }

    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("marquee.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_tagging() {
        let content = Content::Web("https://example.org".to_string());
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, r#"{"type":"web","value":"https://example.org"}"#);

        let parsed: Content = serde_json::from_str(r#"{"type":"text","value":"hi"}"#).unwrap();
        assert_eq!(parsed, Content::Text("hi".to_string()));
        assert_eq!(parsed.kind(), ContentKind::Text);
        assert_eq!(parsed.payload(), "hi");
    }

    #[test]
    fn test_content_summary_truncates_text() {
        let long = "x".repeat(60);
        let summary = Content::Text(long).summary();
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), 41);

        let image = Content::Image("/a/b/poster.png".to_string());
        assert_eq!(image.summary(), "poster.png");
    }

    #[test]
    fn test_backend_cascade_order() {
        assert_eq!(BackendKind::CASCADE[0], BackendKind::InProcess);
        assert_eq!(BackendKind::CASCADE[1], BackendKind::ExternalPlayer);
        assert_eq!(BackendKind::CASCADE[2], BackendKind::SystemDefault);
        assert_eq!(BackendKind::CASCADE[3], BackendKind::WebEmbedded);
    }

    #[test]
    fn test_backend_names_roundtrip() {
        for kind in BackendKind::CASCADE {
            assert_eq!(BackendKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BackendKind::from_name("quicktime"), None);
    }

    #[test]
    fn test_scale_mode_names() {
        assert_eq!(ScaleMode::from_name("FIT"), Some(ScaleMode::Fit));
        assert_eq!(ScaleMode::from_name("tile"), Some(ScaleMode::Tile));
        assert_eq!(ScaleMode::from_name("zoom"), None);
        assert_eq!(ScaleMode::default(), ScaleMode::Fit);
    }

    #[test]
    fn test_error_display() {
        let err = DisplayError::UnsupportedFormat("clip.xyz".to_string());
        assert_eq!(err.to_string(), "Unsupported format: clip.xyz");

        let io: DisplayError = std::io::Error::other("disk gone").into();
        assert!(matches!(io, DisplayError::Io(msg) if msg == "disk gone"));
    }

    #[test]
    fn test_error_roundtrip() {
        let err = DisplayError::StartupTimeout("no frame within 3000ms".to_string());
        let json = serde_json::to_string(&Response::Error(err.clone())).unwrap();
        match serde_json::from_str::<Response>(&json).unwrap() {
            Response::Error(parsed) => assert_eq!(parsed, err),
            other => panic!("Wrong response: {:?}", other),
        }
    }
}
