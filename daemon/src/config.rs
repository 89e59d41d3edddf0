use anyhow::{Context, Result};
use common::{BackendKind, ScaleMode, ScreenInfo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::launcher::ProcessTiming;
use crate::surface::{ChromeStyle, parse_hex_color};
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    /// Screens used when no compositor is available; empty means one default screen
    #[serde(default, rename = "screen")]
    pub screens: Vec<ScreenConfig>,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default = "default_players", rename = "player")]
    pub players: Vec<PlayerSpec>,

    #[serde(default = "default_web_engines", rename = "web_engine")]
    pub web_engines: Vec<WebEngineSpec>,

    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,

    #[serde(default)]
    pub window: WindowSettings,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Profile applied right after startup
    #[serde(default)]
    pub startup_profile: Option<String>,

    #[serde(default = "default_scale")]
    pub default_scale: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            startup_profile: None,
            default_scale: default_scale(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_scale() -> String {
    "fit".to_string()
}

/// One physical screen
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenConfig {
    pub name: String,

    #[serde(default)]
    pub x: i32,

    #[serde(default)]
    pub y: i32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub primary: bool,
}

fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}

impl ScreenConfig {
    pub fn to_info(&self) -> ScreenInfo {
        ScreenInfo {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            primary: self.primary,
        }
    }
}

/// Video playback settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// In-process decoder: auto, ffmpeg or gstreamer
    #[serde(default = "default_decoder")]
    pub decoder: String,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,

    /// Enabled backends. Order is ignored, the cascade order is fixed.
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    #[serde(default = "default_launch_settle")]
    pub launch_settle_ms: u64,

    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            decoder: default_decoder(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            backends: default_backends(),
            startup_timeout_ms: default_startup_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            launch_settle_ms: default_launch_settle(),
            kill_grace_ms: default_kill_grace(),
        }
    }
}

fn default_decoder() -> String {
    "auto".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}
fn default_backends() -> Vec<String> {
    BackendKind::CASCADE
        .iter()
        .map(|kind| kind.name().to_string())
        .collect()
}
fn default_startup_timeout() -> u64 {
    3000
}
fn default_stop_timeout() -> u64 {
    500
}
fn default_launch_settle() -> u64 {
    1000
}
fn default_kill_grace() -> u64 {
    1500
}

impl PlaybackSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn process_timing(&self) -> ProcessTiming {
        ProcessTiming {
            settle: Duration::from_millis(self.launch_settle_ms),
            grace: Duration::from_millis(self.kill_grace_ms),
        }
    }

    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        self.backends.iter().any(|name| name == kind.name())
    }
}

/// An external media player
///
/// `args` placeholders: `{path} {x} {y} {width} {height} {screen}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlayerSpec {
    pub name: String,

    /// Absolute install paths and/or bare names looked up on PATH
    pub candidates: Vec<String>,

    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
}

fn default_player_args() -> Vec<String> {
    vec!["{path}".to_string()]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_players() -> Vec<PlayerSpec> {
    vec![
        PlayerSpec {
            name: "vlc".to_string(),
            candidates: strings(&[
                "C:\\Program Files\\VideoLAN\\VLC\\vlc.exe",
                "C:\\Program Files (x86)\\VideoLAN\\VLC\\vlc.exe",
                "/Applications/VLC.app/Contents/MacOS/VLC",
                "vlc",
            ]),
            args: strings(&[
                "{path}",
                "--loop",
                "--fullscreen",
                "--no-video-title-show",
                "--intf",
                "dummy",
            ]),
        },
        PlayerSpec {
            name: "mpv".to_string(),
            candidates: strings(&["mpv"]),
            args: strings(&[
                "{path}",
                "--loop-file=inf",
                "--fullscreen",
                "--no-osc",
                "--geometry={width}x{height}+{x}+{y}",
            ]),
        },
        PlayerSpec {
            name: "potplayer".to_string(),
            candidates: strings(&[
                "C:\\Program Files\\DAUM\\PotPlayer\\PotPlayerMini64.exe",
                "C:\\Program Files (x86)\\DAUM\\PotPlayer\\PotPlayerMini.exe",
            ]),
            args: strings(&["{path}", "/loop", "/fullscreen"]),
        },
        PlayerSpec {
            name: "wmplayer".to_string(),
            candidates: strings(&["C:\\Program Files\\Windows Media Player\\wmplayer.exe"]),
            args: strings(&["{path}", "/fullscreen"]),
        },
    ]
}

/// A web engine able to show a page in an app/kiosk window
///
/// Placeholders: `{url} {profile} {x} {y} {width} {height} {screen}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebEngineSpec {
    pub name: String,
    pub candidates: Vec<String>,
    pub args: Vec<String>,

    /// Extra arguments when the screen is fullscreen
    #[serde(default)]
    pub fullscreen_args: Vec<String>,
}

fn chromium_args() -> Vec<String> {
    strings(&[
        "--app={url}",
        "--user-data-dir={profile}",
        "--window-position={x},{y}",
        "--window-size={width},{height}",
        "--autoplay-policy=no-user-gesture-required",
        "--no-first-run",
        "--no-default-browser-check",
    ])
}

fn default_web_engines() -> Vec<WebEngineSpec> {
    vec![
        WebEngineSpec {
            name: "chromium".to_string(),
            candidates: strings(&["chromium", "chromium-browser"]),
            args: chromium_args(),
            fullscreen_args: strings(&["--kiosk"]),
        },
        WebEngineSpec {
            name: "chrome".to_string(),
            candidates: strings(&[
                "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "google-chrome",
                "google-chrome-stable",
            ]),
            args: chromium_args(),
            fullscreen_args: strings(&["--kiosk"]),
        },
        WebEngineSpec {
            name: "edge".to_string(),
            candidates: strings(&[
                "C:\\Program Files (x86)\\Microsoft\\Edge\\Application\\msedge.exe",
                "microsoft-edge",
            ]),
            args: chromium_args(),
            fullscreen_args: strings(&["--kiosk"]),
        },
        WebEngineSpec {
            name: "firefox".to_string(),
            candidates: strings(&["firefox"]),
            args: strings(&["--new-instance", "--profile", "{profile}", "{url}"]),
            fullscreen_args: strings(&["--kiosk"]),
        },
    ]
}

/// Diagnostic view settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticsSettings {
    /// Run ffprobe on files no backend could play
    #[serde(default = "default_true")]
    pub probe: bool,

    /// Command template for the repair remedy, `{path}` is substituted
    #[serde(default)]
    pub repair_tool: Vec<String>,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            probe: true,
            repair_tool: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Window chrome
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowSettings {
    #[serde(default = "default_title_bar_height")]
    pub title_bar_height: u32,

    #[serde(default = "default_margin")]
    pub margin: u32,

    #[serde(default = "default_border_color")]
    pub border_color: String,

    #[serde(default = "default_title_bar_color")]
    pub title_bar_color: String,

    #[serde(default = "default_background")]
    pub background: String,

    #[serde(default)]
    pub start_fullscreen: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title_bar_height: default_title_bar_height(),
            margin: default_margin(),
            border_color: default_border_color(),
            title_bar_color: default_title_bar_color(),
            background: default_background(),
            start_fullscreen: false,
        }
    }
}

fn default_title_bar_height() -> u32 {
    32
}
fn default_margin() -> u32 {
    5
}
fn default_border_color() -> String {
    "#3498db".to_string()
}
fn default_title_bar_color() -> String {
    "#2c3e50".to_string()
}
fn default_background() -> String {
    "#000000".to_string()
}

impl WindowSettings {
    pub fn chrome(&self) -> Result<ChromeStyle> {
        let color = |value: &str| {
            parse_hex_color(value)
                .map(|(r, g, b, _)| (r, g, b))
                .with_context(|| format!("Invalid color: {}", value))
        };

        Ok(ChromeStyle {
            title_bar_height: self.title_bar_height,
            margin: self.margin,
            border: color(&self.border_color)?,
            title_bar: color(&self.title_bar_color)?,
            background: color(&self.background)?,
        })
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Directory holding config.toml and profiles.toml
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to get config directory")?
            .join("marquee"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        validate_enum!(
            self.general.log_level.as_str(),
            "trace",
            "debug",
            "info",
            "warn",
            "error"
        )?;
        self.validate_scale(&self.general.default_scale)?;
        validate_enum!(self.playback.decoder.as_str(), "auto", "ffmpeg", "gstreamer")?;

        for backend in &self.playback.backends {
            validate_enum!(
                backend.as_str(),
                "in-process",
                "external-player",
                "system-default",
                "web"
            )?;
        }

        let mut names = std::collections::HashSet::new();
        for screen in &self.screens {
            if !names.insert(screen.name.as_str()) {
                anyhow::bail!("Duplicate screen name: {}", screen.name);
            }
            if screen.width == 0 || screen.height == 0 {
                anyhow::bail!("Screen {} has a zero dimension", screen.name);
            }
        }

        for player in &self.players {
            if player.candidates.is_empty() {
                anyhow::bail!("Player {} has no candidates", player.name);
            }
        }

        self.window.chrome()?;
        Ok(())
    }

    fn validate_scale(&self, scale: &str) -> Result<()> {
        validate_enum!(scale, "center", "fill", "fit", "stretch", "tile")
    }

    /// Screens to host, falling back to a single 1920x1080 screen
    pub fn screen_infos(&self) -> Vec<ScreenInfo> {
        if self.screens.is_empty() {
            return vec![ScreenInfo {
                name: "screen-1".to_string(),
                x: 0,
                y: 0,
                width: default_width(),
                height: default_height(),
                primary: true,
            }];
        }

        let mut infos: Vec<ScreenInfo> = self.screens.iter().map(ScreenConfig::to_info).collect();
        if !infos.iter().any(|info| info.primary) {
            infos[0].primary = true;
        }
        infos
    }

    pub fn default_scale(&self) -> ScaleMode {
        ScaleMode::from_name(&self.general.default_scale).unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            screens: Vec::new(),
            playback: PlaybackSettings::default(),
            players: default_players(),
            web_engines: default_web_engines(),
            diagnostics: DiagnosticsSettings::default(),
            window: WindowSettings::default(),
        }
    }
}
