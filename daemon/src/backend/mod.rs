//! Playback backends
//!
//! Every way of putting a video on a screen sits behind [`Backend`]:
//!
//! - `in_process`: decode worker + frame presenter drawing into the surface
//! - `external`: a media player child process
//! - `system`: whatever the desktop opens the file with
//! - `web`: a generated HTML player page in a web engine window
//!
//! Backends are created by a [`BackendFactory`], normally [`SystemBackends`].
//! Which kinds are usable is decided once at startup by [`detect`].

pub mod external;
pub mod in_process;
pub mod system;
#[cfg(test)]
pub mod testing;
pub mod web;

use common::{BackendKind, DisplayError, PlaybackStatus, ScreenInfo};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, PlayerSpec, WebEngineSpec};
use crate::launcher::{ProcessTiming, default_open_command, resolve_binary};
use crate::surface::ScreenSurface;
use crate::video::{self, SourceOpener};

pub use external::ExternalPlayerBackend;
pub use in_process::InProcessBackend;
pub use system::SystemDefaultBackend;
pub use web::WebSurfaceBackend;

/// Result of polling a backend that is starting up
#[derive(Debug, Clone, PartialEq)]
pub enum Startup {
    Ready,
    Pending,
    Failed(DisplayError),
}

/// Result of polling a backend that is playing
#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Running,
    /// Playback ended on its own, e.g. the player window was closed
    Ended,
    Failed(DisplayError),
}

/// Where a backend should show its output
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchContext {
    pub screen: ScreenInfo,
    pub fullscreen: bool,
}

impl LaunchContext {
    /// Placeholder values for argument templates
    pub fn template_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x", self.screen.x.to_string()),
            ("y", self.screen.y.to_string()),
            ("width", self.screen.width.to_string()),
            ("height", self.screen.height.to_string()),
            ("screen", self.screen.name.clone()),
        ]
    }
}

pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Start playing `path`; only immediate failures are returned here
    fn try_play(&mut self, path: &Path) -> Result<(), DisplayError>;

    fn poll_startup(&mut self) -> Startup;

    fn poll_health(&mut self) -> Health {
        Health::Running
    }

    /// Draw whatever is new into the surface; returns whether it drew
    fn render(&mut self, _surface: &mut ScreenSurface) -> bool {
        false
    }

    /// Redraw after the surface geometry changed
    fn redraw(&mut self, _surface: &mut ScreenSurface) {}

    fn set_fullscreen(&mut self, _fullscreen: bool) {}

    fn pause(&mut self) -> Result<(), DisplayError> {
        Err(unsupported(self.kind(), "pause"))
    }

    fn resume(&mut self) -> Result<(), DisplayError> {
        Err(unsupported(self.kind(), "resume"))
    }

    fn seek(&mut self, _frame: u64) -> Result<(), DisplayError> {
        Err(unsupported(self.kind(), "seek"))
    }

    fn playback(&self) -> Option<PlaybackStatus> {
        None
    }

    /// Interval at which `render` wants to be called, if it draws frames
    fn frame_interval(&self) -> Option<Duration> {
        None
    }

    /// Non-blocking first half of teardown
    fn request_stop(&mut self);

    /// Blocking, bounded second half of teardown
    fn stop(&mut self);

    fn is_running(&mut self) -> bool;
}

pub fn unsupported(kind: BackendKind, operation: &str) -> DisplayError {
    DisplayError::Unsupported(format!("{} is not supported by the {} backend", operation, kind.name()))
}

/// Creates backends for the cascade and the web content type
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind, ctx: &LaunchContext) -> Box<dyn Backend>;

    /// A web engine window showing `url`
    fn open_page(&self, ctx: &LaunchContext, url: &str) -> Result<Box<dyn Backend>, DisplayError>;
}

/// Stand-in for a kind whose prerequisites are missing
struct UnavailableBackend {
    kind: BackendKind,
    reason: String,
}

impl Backend for UnavailableBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn try_play(&mut self, _path: &Path) -> Result<(), DisplayError> {
        Err(DisplayError::BackendUnavailable(self.reason.clone()))
    }

    fn poll_startup(&mut self) -> Startup {
        Startup::Failed(DisplayError::BackendUnavailable(self.reason.clone()))
    }

    fn request_stop(&mut self) {}

    fn stop(&mut self) {}

    fn is_running(&mut self) -> bool {
        false
    }
}

/// Backends backed by real decoders and processes on this machine
pub struct SystemBackends {
    opener: Option<Arc<dyn SourceOpener>>,
    players: Vec<PlayerSpec>,
    engines: Vec<WebEngineSpec>,
    timing: ProcessTiming,
    startup_timeout: Duration,
    stop_timeout: Duration,
    /// Decoded frames only reach the screen through a compositor connection
    presentable: bool,
}

impl SystemBackends {
    pub fn from_config(config: &Config, presentable: bool) -> Self {
        let playback = &config.playback;
        Self {
            opener: video::select_opener(&playback.decoder, &playback.ffmpeg, &playback.ffprobe),
            players: config.players.clone(),
            engines: config.web_engines.clone(),
            timing: playback.process_timing(),
            startup_timeout: playback.startup_timeout(),
            stop_timeout: playback.stop_timeout(),
            presentable,
        }
    }

    /// Whether the prerequisites of `kind` exist on this machine
    pub fn is_available(&self, kind: BackendKind) -> Result<(), String> {
        match kind {
            BackendKind::InProcess if !self.presentable => Err(NO_COMPOSITOR.to_string()),
            BackendKind::InProcess => match &self.opener {
                Some(_) => Ok(()),
                None => Err("no usable decoder (ffmpeg/ffprobe or GStreamer)".to_string()),
            },
            BackendKind::ExternalPlayer => {
                if self.players.iter().any(|p| resolve_binary(&p.candidates).is_some()) {
                    Ok(())
                } else {
                    Err(format!("no media player found ({})", names(self.players.iter().map(|p| &p.name))))
                }
            }
            BackendKind::SystemDefault => {
                let (launcher, _) = default_open_command("");
                match resolve_binary(std::slice::from_ref(&launcher)) {
                    Some(_) => Ok(()),
                    None => Err(format!("{} not found", launcher)),
                }
            }
            BackendKind::WebEmbedded => {
                if self.engines.iter().any(|e| resolve_binary(&e.candidates).is_some()) {
                    Ok(())
                } else {
                    Err(format!("no web engine found ({})", names(self.engines.iter().map(|e| &e.name))))
                }
            }
        }
    }
}

const NO_COMPOSITOR: &str = "no compositor connection to present frames";

fn names<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl BackendFactory for SystemBackends {
    fn create(&self, kind: BackendKind, ctx: &LaunchContext) -> Box<dyn Backend> {
        match kind {
            BackendKind::InProcess if !self.presentable => Box::new(UnavailableBackend {
                kind,
                reason: NO_COMPOSITOR.to_string(),
            }),
            BackendKind::InProcess => match &self.opener {
                Some(opener) => Box::new(InProcessBackend::new(
                    Arc::clone(opener),
                    &ctx.screen.name,
                    self.startup_timeout,
                    self.stop_timeout,
                )),
                None => Box::new(UnavailableBackend {
                    kind,
                    reason: "no usable decoder".to_string(),
                }),
            },
            BackendKind::ExternalPlayer => Box::new(ExternalPlayerBackend::new(
                self.players.clone(),
                ctx.clone(),
                self.timing,
            )),
            BackendKind::SystemDefault => {
                Box::new(SystemDefaultBackend::new(ctx.clone(), self.timing))
            }
            BackendKind::WebEmbedded => Box::new(WebSurfaceBackend::new(
                self.engines.clone(),
                ctx.clone(),
                self.timing,
            )),
        }
    }

    fn open_page(&self, ctx: &LaunchContext, url: &str) -> Result<Box<dyn Backend>, DisplayError> {
        let mut backend = WebSurfaceBackend::new(self.engines.clone(), ctx.clone(), self.timing);
        backend.open_url(url)?;
        Ok(Box::new(backend))
    }
}

/// Usable backends in cascade order, plus the factory that builds them
pub struct Detected {
    pub ranked: Vec<BackendKind>,
    pub factory: Arc<dyn BackendFactory>,
}

/// Probe which backends can run here. Done once at startup.
///
/// `presentable` says whether a compositor connection exists to show
/// frames decoded in-process.
pub fn detect(config: &Config, presentable: bool) -> Detected {
    let backends = SystemBackends::from_config(config, presentable);
    let mut ranked = Vec::new();

    for kind in BackendKind::CASCADE {
        if !config.playback.is_enabled(kind) {
            log::info!("Backend {} disabled in config", kind.name());
            continue;
        }
        match backends.is_available(kind) {
            Ok(()) => {
                log::info!("✓ Backend {} available", kind.name());
                ranked.push(kind);
            }
            Err(reason) => log::warn!("Backend {} unavailable: {}", kind.name(), reason),
        }
    }

    if ranked.is_empty() {
        log::warn!("No playback backend available; videos will show the diagnostic view");
    }

    Detected {
        ranked,
        factory: Arc::new(backends),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LaunchContext {
        LaunchContext {
            screen: ScreenInfo {
                name: "left".to_string(),
                x: -1280,
                y: 0,
                width: 1280,
                height: 720,
                primary: false,
            },
            fullscreen: false,
        }
    }

    #[test]
    fn test_template_vars() {
        let vars = ctx().template_vars();
        assert!(vars.contains(&("x", "-1280".to_string())));
        assert!(vars.contains(&("width", "1280".to_string())));
        assert!(vars.contains(&("screen", "left".to_string())));
    }

    #[test]
    fn test_detect_respects_disabled_backends() {
        let mut config = Config::default();
        config.playback.backends = vec!["web".to_string()];
        config.web_engines.clear();

        let detected = detect(&config, true);
        assert!(detected.ranked.is_empty());
    }

    #[test]
    fn test_detect_keeps_cascade_order() {
        let mut config = Config::default();
        config.playback.backends = vec!["web".to_string(), "in-process".to_string()];

        let detected = detect(&config, true);
        let positions: Vec<usize> = detected
            .ranked
            .iter()
            .map(|k| BackendKind::CASCADE.iter().position(|c| c == k).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unavailable_in_process_reports_backend_unavailable() {
        let backends = SystemBackends {
            opener: None,
            players: Vec::new(),
            engines: Vec::new(),
            timing: ProcessTiming::default(),
            startup_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_millis(100),
            presentable: true,
        };

        assert!(backends.is_available(BackendKind::InProcess).is_err());
        assert!(backends.is_available(BackendKind::ExternalPlayer).is_err());

        let mut backend = backends.create(BackendKind::InProcess, &ctx());
        assert_eq!(backend.kind(), BackendKind::InProcess);
        assert!(matches!(
            backend.try_play(Path::new("/tmp/x.mp4")),
            Err(DisplayError::BackendUnavailable(_))
        ));
        assert!(matches!(backend.pause(), Err(DisplayError::Unsupported(_))));
    }

    #[test]
    fn test_in_process_needs_a_compositor() {
        let mut config = Config::default();
        config.playback.backends = vec!["in-process".to_string()];

        let detected = detect(&config, false);
        assert!(detected.ranked.is_empty());

        let mut backend = detected.factory.create(BackendKind::InProcess, &ctx());
        match backend.try_play(Path::new("/tmp/x.mp4")) {
            Err(DisplayError::BackendUnavailable(reason)) => assert!(reason.contains("compositor")),
            other => panic!("expected BackendUnavailable, got {:?}", other.map(|_| ())),
        }
    }
}
