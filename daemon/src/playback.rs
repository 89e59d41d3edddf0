//! Video playback orchestration
//!
//! [`PlaybackOrchestrator::play`] validates a request and returns a
//! [`Cascade`]: a state machine that walks the ranked backend list one
//! backend at a time, recording an attempt per backend. The display loop
//! drives it with [`Cascade::step`], so a slow backend never blocks other
//! screens.

use common::{AttemptOutcome, BackendAttempt, BackendKind, DisplayError, ScreenInfo};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Backend, BackendFactory, LaunchContext, Startup};

/// Container extensions accepted for video content
pub const VIDEO_EXTENSIONS: [&str; 9] = [
    "mp4", "avi", "mov", "wmv", "mkv", "flv", "webm", "m4v", "3gp",
];

const MIN_READABLE_BYTES: usize = 4;

/// Resolve and check a video path before any backend sees it.
///
/// Existence is checked first, then the extension, then readability.
pub fn validate_video_path(raw: &str) -> Result<PathBuf, DisplayError> {
    let expanded = shellexpand::tilde(raw.trim()).into_owned();
    let mut path = PathBuf::from(expanded);
    if path.is_relative() {
        let cwd = std::env::current_dir().map_err(DisplayError::from)?;
        path = cwd.join(path);
    }

    if !path.is_file() {
        return Err(DisplayError::FileNotFound(path.display().to_string()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        return Err(DisplayError::UnsupportedFormat(format!(
            "{} (supported: {})",
            path.display(),
            VIDEO_EXTENSIONS.join(", ")
        )));
    }

    let mut header = [0u8; MIN_READABLE_BYTES];
    let read = File::open(&path)
        .and_then(|mut file| read_up_to(&mut file, &mut header))
        .map_err(|e| DisplayError::UnreadableFile(format!("{}: {}", path.display(), e)))?;
    if read < MIN_READABLE_BYTES {
        return Err(DisplayError::UnreadableFile(format!(
            "{}: only {} bytes readable",
            path.display(),
            read
        )));
    }

    Ok(path)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Starts cascades over the backends detected at startup
pub struct PlaybackOrchestrator {
    ranked: Vec<BackendKind>,
    factory: Arc<dyn BackendFactory>,
}

impl PlaybackOrchestrator {
    pub fn new(ranked: Vec<BackendKind>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { ranked, factory }
    }

    pub fn ranked(&self) -> &[BackendKind] {
        &self.ranked
    }

    pub fn factory(&self) -> &Arc<dyn BackendFactory> {
        &self.factory
    }

    /// Validate `raw_path` and prepare a cascade for it. No backend is
    /// touched until the first [`Cascade::step`].
    pub fn play(&self, screen: &ScreenInfo, fullscreen: bool, raw_path: &str) -> Result<Cascade, DisplayError> {
        let path = validate_video_path(raw_path)?;
        log::info!(
            "[{}] Playing {} (backends: {})",
            screen.name,
            path.display(),
            self.ranked
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(" → ")
        );

        Ok(Cascade {
            path,
            ctx: LaunchContext {
                screen: screen.clone(),
                fullscreen,
            },
            factory: Arc::clone(&self.factory),
            remaining: self.ranked.iter().copied().collect(),
            current: None,
            ready: false,
            attempts: Vec::new(),
            retired: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStep {
    /// A backend is still starting
    Pending,
    /// The current backend is playing; take it with [`Cascade::take_backend`]
    Ready,
    /// Every backend failed
    Exhausted,
}

pub struct Cascade {
    path: PathBuf,
    ctx: LaunchContext,
    factory: Arc<dyn BackendFactory>,
    remaining: VecDeque<BackendKind>,
    current: Option<Box<dyn Backend>>,
    ready: bool,
    attempts: Vec<BackendAttempt>,
    /// Failed backends waiting for a full stop
    retired: Vec<Box<dyn Backend>>,
}

impl Cascade {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attempts(&self) -> &[BackendAttempt] {
        &self.attempts
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.ctx.fullscreen = fullscreen;
        if let Some(backend) = self.current.as_mut() {
            backend.set_fullscreen(fullscreen);
        }
    }

    /// Advance by at most one startup poll
    pub fn step(&mut self) -> CascadeStep {
        if self.ready {
            return CascadeStep::Ready;
        }

        loop {
            if self.current.is_none() {
                let Some(kind) = self.remaining.pop_front() else {
                    log::warn!(
                        "[{}] No backend could play {}",
                        self.ctx.screen.name,
                        self.path.display()
                    );
                    return CascadeStep::Exhausted;
                };

                log::info!("[{}] Trying {} backend", self.ctx.screen.name, kind.name());
                let mut backend = self.factory.create(kind, &self.ctx);
                match backend.try_play(&self.path) {
                    Ok(()) => self.current = Some(backend),
                    Err(e) => {
                        self.fail(backend, e);
                        continue;
                    }
                }
            }

            let Some(backend) = self.current.as_mut() else {
                continue;
            };
            match backend.poll_startup() {
                Startup::Pending => return CascadeStep::Pending,
                Startup::Ready => {
                    let kind = backend.kind();
                    log::info!("[{}] ✓ Playing with {} backend", self.ctx.screen.name, kind.name());
                    self.attempts.push(BackendAttempt {
                        backend: kind,
                        outcome: AttemptOutcome::Success,
                        message: None,
                    });
                    self.ready = true;
                    return CascadeStep::Ready;
                }
                Startup::Failed(e) => {
                    if let Some(backend) = self.current.take() {
                        self.fail(backend, e);
                    }
                }
            }
        }
    }

    fn fail(&mut self, mut backend: Box<dyn Backend>, error: DisplayError) {
        let kind = backend.kind();
        log::warn!(
            "[{}] {} backend failed: {}",
            self.ctx.screen.name,
            kind.name(),
            error
        );
        backend.request_stop();
        self.attempts.push(BackendAttempt {
            backend: kind,
            outcome: AttemptOutcome::Failure,
            message: Some(error.to_string()),
        });
        self.retired.push(backend);
    }

    /// Hand over the backend that reported ready
    pub fn take_backend(&mut self) -> Option<Box<dyn Backend>> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        self.current.take()
    }

    /// The active backend failed while playing: rewrite its attempt record
    /// so the next [`step`](Self::step) resumes with the next backend.
    pub fn record_runtime_failure(&mut self, kind: BackendKind, error: &DisplayError) {
        let message = format!("failed during playback: {}", error);
        match self.attempts.iter_mut().rev().find(|a| a.backend == kind) {
            Some(attempt) => {
                attempt.outcome = AttemptOutcome::Failure;
                attempt.message = Some(message);
            }
            None => self.attempts.push(BackendAttempt {
                backend: kind,
                outcome: AttemptOutcome::Failure,
                message: Some(message),
            }),
        }
        self.ready = false;
    }

    /// Failed backends that still need a blocking stop
    pub fn take_retired(&mut self) -> Vec<Box<dyn Backend>> {
        std::mem::take(&mut self.retired)
    }

    /// Abandon the cascade, returning every backend it still owns
    pub fn cancel(&mut self) -> Vec<Box<dyn Backend>> {
        let mut backends = self.take_retired();
        if let Some(mut backend) = self.current.take() {
            backend.request_stop();
            backends.push(backend);
        }
        self.remaining.clear();
        self.ready = false;
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Health;
    use crate::backend::testing::{Script, ScriptedFactory};
    use crate::video::testing::PatternOpener;
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn screen() -> ScreenInfo {
        ScreenInfo {
            name: "main".to_string(),
            x: 0,
            y: 0,
            width: 1280,
            height: 720,
            primary: true,
        }
    }

    fn video_file(extension: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", extension))
            .tempfile()
            .unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn run(cascade: &mut Cascade) -> CascadeStep {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match cascade.step() {
                CascadeStep::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                other => return other,
            }
        }
    }

    fn outcomes(cascade: &Cascade) -> Vec<(BackendKind, AttemptOutcome)> {
        cascade
            .attempts()
            .iter()
            .map(|a| (a.backend, a.outcome))
            .collect()
    }

    fn orchestrator(factory: ScriptedFactory) -> PlaybackOrchestrator {
        PlaybackOrchestrator::new(BackendKind::CASCADE.to_vec(), Arc::new(factory))
    }

    #[test]
    fn test_missing_file_is_file_not_found() {
        let result = validate_video_path("/definitely/not/here.mp4");
        assert!(matches!(result, Err(DisplayError::FileNotFound(_))));

        // Existence wins over the extension check
        let result = validate_video_path("/definitely/not/here.txt");
        assert!(matches!(result, Err(DisplayError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = video_file("txt", b"not a video");
        let result = validate_video_path(&file.path().display().to_string());
        assert!(matches!(result, Err(DisplayError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_short_file_is_unreadable() {
        let file = video_file("mp4", b"abc");
        let result = validate_video_path(&file.path().display().to_string());
        assert!(matches!(result, Err(DisplayError::UnreadableFile(_))));
    }

    #[test]
    fn test_uppercase_extension_accepted() {
        let file = video_file("MKV", b"\x1a\x45\xdf\xa3 matroska");
        let path = validate_video_path(&file.path().display().to_string()).unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_validation_failure_records_no_attempts() {
        let factory = ScriptedFactory::new();
        let probe = Arc::clone(&factory.probe);
        let orchestrator = orchestrator(factory);

        let result = orchestrator.play(&screen(), false, "/nope/missing.mp4");

        assert!(matches!(result, Err(DisplayError::FileNotFound(_))));
        assert_eq!(probe.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_in_process_failure_falls_to_external() {
        let file = video_file("mp4", b"\0\0\0\x18ftypmp42");
        let factory = ScriptedFactory::new()
            .with(
                BackendKind::InProcess,
                Script::RejectPlay(DisplayError::DecodeError("codec".to_string())),
            )
            .with(BackendKind::ExternalPlayer, Script::ReadyAfter(2));
        let orchestrator = orchestrator(factory);

        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        assert_eq!(run(&mut cascade), CascadeStep::Ready);
        assert_eq!(
            outcomes(&cascade),
            vec![
                (BackendKind::InProcess, AttemptOutcome::Failure),
                (BackendKind::ExternalPlayer, AttemptOutcome::Success),
            ]
        );
        assert_eq!(cascade.take_retired().len(), 1);

        let backend = cascade.take_backend().unwrap();
        assert_eq!(backend.kind(), BackendKind::ExternalPlayer);
        assert!(cascade.take_backend().is_none());
    }

    #[test]
    fn test_every_backend_fails_in_order() {
        let file = video_file("webm", b"\x1a\x45\xdf\xa3");
        let factory = ScriptedFactory::new()
            .with(
                BackendKind::ExternalPlayer,
                Script::FailAfter(1, DisplayError::ProcessLaunchFailure("vlc exited".to_string())),
            )
            .with(
                BackendKind::SystemDefault,
                Script::RejectPlay(DisplayError::BackendUnavailable("no xdg-open".to_string())),
            );
        let orchestrator = orchestrator(factory);

        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        assert_eq!(run(&mut cascade), CascadeStep::Exhausted);
        let attempts = cascade.attempts();
        assert_eq!(attempts.len(), 4);
        for (attempt, kind) in attempts.iter().zip(BackendKind::CASCADE) {
            assert_eq!(attempt.backend, kind);
            assert_eq!(attempt.outcome, AttemptOutcome::Failure);
            assert!(attempt.message.is_some());
        }
        assert!(attempts[1].message.as_deref().unwrap().contains("vlc exited"));
        assert_eq!(cascade.step(), CascadeStep::Exhausted);
    }

    #[test]
    fn test_step_does_not_block_while_pending() {
        let file = video_file("mp4", b"\0\0\0\x18ftyp");
        let factory = ScriptedFactory::new().with(BackendKind::InProcess, Script::ReadyAfter(3));
        let orchestrator = orchestrator(factory);
        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        assert_eq!(cascade.step(), CascadeStep::Pending);
        assert_eq!(cascade.step(), CascadeStep::Pending);
        assert_eq!(cascade.step(), CascadeStep::Pending);
        assert_eq!(cascade.step(), CascadeStep::Ready);
        assert!(cascade.attempts().len() == 1);
    }

    #[test]
    fn test_runtime_failure_resumes_with_next_backend() {
        let file = video_file("mp4", b"\0\0\0\x18ftyp");
        let factory = ScriptedFactory::new()
            .with(BackendKind::InProcess, Script::ReadyAfter(0))
            .with(BackendKind::ExternalPlayer, Script::ReadyAfter(0));
        let probe = Arc::clone(&factory.probe);
        let orchestrator = orchestrator(factory);
        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        assert_eq!(run(&mut cascade), CascadeStep::Ready);
        let mut first = cascade.take_backend().unwrap();
        assert_eq!(first.kind(), BackendKind::InProcess);

        probe.set_health(
            BackendKind::InProcess,
            Health::Failed(DisplayError::DecodeError("bitstream".to_string())),
        );
        let Health::Failed(error) = first.poll_health() else {
            panic!("expected a failure");
        };
        cascade.record_runtime_failure(first.kind(), &error);

        assert_eq!(run(&mut cascade), CascadeStep::Ready);
        assert_eq!(
            outcomes(&cascade),
            vec![
                (BackendKind::InProcess, AttemptOutcome::Failure),
                (BackendKind::ExternalPlayer, AttemptOutcome::Success),
            ]
        );
        assert!(cascade.attempts()[0]
            .message
            .as_deref()
            .unwrap()
            .contains("during playback"));
    }

    #[test]
    fn test_in_process_startup_timeout_moves_on() {
        let file = video_file("mp4", b"\0\0\0\x18ftyp");
        // Opening takes longer than the in-process startup window
        let factory = ScriptedFactory::new()
            .with_pattern(PatternOpener::new(10, 10.0).with_open_delay(Duration::from_secs(4)))
            .with(BackendKind::ExternalPlayer, Script::ReadyAfter(0));
        let orchestrator = orchestrator(factory);
        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(8);
        let step = loop {
            match cascade.step() {
                CascadeStep::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20))
                }
                other => break other,
            }
        };

        assert_eq!(step, CascadeStep::Ready);
        assert_eq!(cascade.attempts()[0].backend, BackendKind::InProcess);
        assert!(cascade.attempts()[0]
            .message
            .as_deref()
            .unwrap()
            .contains("no frame decoded"));
    }

    #[test]
    fn test_cancel_returns_owned_backends() {
        let file = video_file("mp4", b"\0\0\0\x18ftyp");
        let factory = ScriptedFactory::new()
            .with(
                BackendKind::InProcess,
                Script::RejectPlay(DisplayError::DecodeError("x".to_string())),
            )
            .with(BackendKind::ExternalPlayer, Script::ReadyAfter(100));
        let probe = Arc::clone(&factory.probe);
        let orchestrator = orchestrator(factory);
        let mut cascade = orchestrator
            .play(&screen(), false, &file.path().display().to_string())
            .unwrap();

        assert_eq!(cascade.step(), CascadeStep::Pending);
        let backends = cascade.cancel();

        assert_eq!(backends.len(), 2);
        assert_eq!(probe.stop_requested.load(Ordering::SeqCst), 2);
        assert_eq!(cascade.step(), CascadeStep::Exhausted);
    }
}
