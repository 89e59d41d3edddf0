//! Web engine backend
//!
//! Shows either a URL (web content) or a generated HTML player page for a
//! video file in a web engine window placed on the screen. The page and the
//! engine profile directory are temporary and removed on stop.

use common::{BackendKind, DisplayError};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

use super::{Backend, Health, LaunchContext, Startup};
use crate::config::WebEngineSpec;
use crate::launcher::{Liveness, ManagedProcess, ProcessTiming, describe_exit, expand_args, resolve_binary};

pub struct WebSurfaceBackend {
    engines: Vec<WebEngineSpec>,
    ctx: LaunchContext,
    timing: ProcessTiming,
    url: Option<String>,
    page: Option<NamedTempFile>,
    profile: Option<TempDir>,
    queue: VecDeque<(WebEngineSpec, PathBuf)>,
    process: Option<ManagedProcess>,
    failures: Vec<String>,
}

impl WebSurfaceBackend {
    pub fn new(engines: Vec<WebEngineSpec>, ctx: LaunchContext, timing: ProcessTiming) -> Self {
        Self {
            engines,
            ctx,
            timing,
            url: None,
            page: None,
            profile: None,
            queue: VecDeque::new(),
            process: None,
            failures: Vec::new(),
        }
    }

    /// Open `url` in the first engine that starts
    pub fn open_url(&mut self, url: &str) -> Result<(), DisplayError> {
        self.queue = self
            .engines
            .iter()
            .filter_map(|engine| {
                resolve_binary(&engine.candidates).map(|binary| (engine.clone(), binary))
            })
            .collect();

        if self.queue.is_empty() {
            let names: Vec<&str> = self.engines.iter().map(|e| e.name.as_str()).collect();
            return Err(DisplayError::BackendUnavailable(format!(
                "no web engine found (tried {})",
                names.join(", ")
            )));
        }

        self.url = Some(url.to_string());
        if self.launch_next() {
            Ok(())
        } else {
            Err(self.launch_failure())
        }
    }

    fn launch_next(&mut self) -> bool {
        let Some(url) = self.url.clone() else {
            return false;
        };

        while let Some((engine, binary)) = self.queue.pop_front() {
            // Each engine gets a fresh profile so it opens a new window
            // instead of handing the URL to a running browser.
            let profile = match tempfile::Builder::new().prefix("marquee-web-").tempdir() {
                Ok(dir) => dir,
                Err(e) => {
                    self.failures.push(format!("profile directory: {}", e));
                    return false;
                }
            };

            let mut vars = self.ctx.template_vars();
            vars.push(("url", url.clone()));
            vars.push(("profile", profile.path().display().to_string()));
            let mut args = expand_args(&engine.args, &vars);
            if self.ctx.fullscreen {
                args.extend(expand_args(&engine.fullscreen_args, &vars));
            }

            match ManagedProcess::spawn(&engine.name, &binary, &args) {
                Ok(process) => {
                    self.process = Some(process);
                    self.profile = Some(profile);
                    return true;
                }
                Err(e) => {
                    log::warn!("[{}] {}", self.ctx.screen.name, e);
                    self.failures.push(e.to_string());
                }
            }
        }
        false
    }

    fn launch_failure(&self) -> DisplayError {
        DisplayError::ProcessLaunchFailure(if self.failures.is_empty() {
            "no web engine stayed running".to_string()
        } else {
            self.failures.join("; ")
        })
    }
}

impl Backend for WebSurfaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WebEmbedded
    }

    fn try_play(&mut self, path: &Path) -> Result<(), DisplayError> {
        let html = player_page(path);
        let mut page = tempfile::Builder::new()
            .prefix("marquee-player-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| DisplayError::Io(format!("Failed to create player page: {}", e)))?;
        page.write_all(html.as_bytes())
            .and_then(|()| page.flush())
            .map_err(|e| DisplayError::Io(format!("Failed to write player page: {}", e)))?;

        let url = file_url(page.path());
        self.page = Some(page);
        self.open_url(&url)
    }

    fn poll_startup(&mut self) -> Startup {
        let Some(process) = self.process.as_mut() else {
            return Startup::Failed(self.launch_failure());
        };

        match process.liveness(self.timing.settle) {
            Liveness::Alive => Startup::Ready,
            Liveness::Starting => Startup::Pending,
            Liveness::Exited(status) => {
                self.failures
                    .push(format!("{} {} during startup", process.name(), describe_exit(status)));
                self.process = None;
                self.profile = None;
                if self.launch_next() {
                    Startup::Pending
                } else {
                    Startup::Failed(self.launch_failure())
                }
            }
        }
    }

    fn poll_health(&mut self) -> Health {
        let Some(process) = self.process.as_mut() else {
            return Health::Ended;
        };

        match process.try_exit() {
            None => Health::Running,
            Some(status) if status.success() => Health::Ended,
            Some(status) => Health::Failed(DisplayError::ProcessLaunchFailure(format!(
                "{} {}",
                process.name(),
                describe_exit(status)
            ))),
        }
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        // Kiosk mode is a launch flag; it applies to the next engine window
        self.ctx.fullscreen = fullscreen;
    }

    fn request_stop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            process.terminate();
        }
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop(self.timing.grace);
        }
        self.page = None;
        self.profile = None;
    }

    fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ManagedProcess::is_alive)
    }
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("3gp") => "video/3gpp",
        Some("ogv") | Some("ogg") => "video/ogg",
        _ => "video/mp4",
    }
}

/// `file://` URL with everything outside the unreserved set percent-encoded
pub fn file_url(path: &Path) -> String {
    let raw = path.display().to_string().replace('\\', "/");
    let mut url = String::from("file://");
    if !raw.starts_with('/') {
        url.push('/');
    }
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' | b':' => {
                url.push(byte as char)
            }
            _ => url.push_str(&format!("%{:02X}", byte)),
        }
    }
    url
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Self-contained page playing `path` muted, looped and letterboxed
pub fn player_page(path: &Path) -> String {
    let url = escape_html(&file_url(path));
    let name = escape_html(
        &path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{name}</title>
<style>
html, body {{ margin: 0; width: 100%; height: 100%; background: #000; overflow: hidden; }}
video {{ width: 100%; height: 100%; object-fit: contain; }}
#failure {{ display: none; position: absolute; top: 45%; width: 100%; text-align: center;
  color: #ecf0f1; font: 20px sans-serif; }}
</style>
</head>
<body>
<video id="player" autoplay loop muted playsinline>
<source src="{url}" type="{mime}">
<source src="{url}" type="video/webm">
<source src="{url}" type="video/ogg">
</video>
<div id="failure">{name} cannot be played here.</div>
<script>
document.getElementById("player").addEventListener("error", function () {{
  document.getElementById("failure").style.display = "block";
}}, true);
</script>
</body>
</html>
"#,
        name = name,
        url = url,
        mime = mime_type(path),
    )
}
