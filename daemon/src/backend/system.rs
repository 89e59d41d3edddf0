//! OS-default launcher backend
//!
//! Hands the file to `xdg-open`, `open` or `start`. The application that
//! ends up playing it is outside our control, so once launched the session
//! counts as running until it is stopped.

use common::{BackendKind, DisplayError};
use std::path::{Path, PathBuf};

use super::{Backend, LaunchContext, Startup};
use crate::launcher::{
    Liveness, ManagedProcess, ProcessTiming, default_open_command, describe_exit, resolve_binary,
};

pub struct SystemDefaultBackend {
    ctx: LaunchContext,
    timing: ProcessTiming,
    launcher: Option<ManagedProcess>,
    launched: bool,
    stopped: bool,
}

impl SystemDefaultBackend {
    pub fn new(ctx: LaunchContext, timing: ProcessTiming) -> Self {
        Self {
            ctx,
            timing,
            launcher: None,
            launched: false,
            stopped: false,
        }
    }

    fn launch(&mut self, program: &str, args: &[String]) -> Result<(), DisplayError> {
        let binary: PathBuf = resolve_binary(&[program.to_string()])
            .ok_or_else(|| DisplayError::BackendUnavailable(format!("{} not found", program)))?;

        self.launcher = Some(ManagedProcess::spawn(program, &binary, args)?);
        self.launched = true;
        Ok(())
    }
}

impl Backend for SystemDefaultBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SystemDefault
    }

    fn try_play(&mut self, path: &Path) -> Result<(), DisplayError> {
        let (program, args) = default_open_command(&path.display().to_string());
        self.launch(&program, &args)
    }

    fn poll_startup(&mut self) -> Startup {
        let Some(launcher) = self.launcher.as_mut() else {
            return Startup::Failed(DisplayError::ProcessLaunchFailure(
                "launcher was never started".to_string(),
            ));
        };

        match launcher.liveness(self.timing.settle) {
            Liveness::Exited(status) if status.success() => Startup::Ready,
            Liveness::Exited(status) => Startup::Failed(DisplayError::ProcessLaunchFailure(format!(
                "{} {}",
                launcher.name(),
                describe_exit(status)
            ))),
            Liveness::Alive => Startup::Ready,
            Liveness::Starting => Startup::Pending,
        }
    }

    fn request_stop(&mut self) {
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.terminate();
        }
    }

    fn stop(&mut self) {
        if let Some(mut launcher) = self.launcher.take() {
            launcher.stop(self.timing.grace);
        }
        if self.launched && !self.stopped {
            log::info!(
                "[{}] Session closed; the application opened by the desktop keeps running",
                self.ctx.screen.name
            );
        }
        self.stopped = true;
    }

    fn is_running(&mut self) -> bool {
        self.launched && !self.stopped
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use common::ScreenInfo;
    use std::time::{Duration, Instant};

    fn backend() -> SystemDefaultBackend {
        SystemDefaultBackend::new(
            LaunchContext {
                screen: ScreenInfo {
                    name: "main".to_string(),
                    x: 0,
                    y: 0,
                    width: 800,
                    height: 600,
                    primary: true,
                },
                fullscreen: false,
            },
            ProcessTiming {
                settle: Duration::from_millis(300),
                grace: Duration::from_millis(300),
            },
        )
    }

    fn settle(backend: &mut SystemDefaultBackend) -> Startup {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match backend.poll_startup() {
                Startup::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                other => return other,
            }
        }
    }

    #[test]
    fn test_successful_launcher_exit_is_ready() {
        let mut backend = backend();
        backend.launch("true", &[]).unwrap();

        assert_eq!(settle(&mut backend), Startup::Ready);
        assert!(backend.is_running());

        backend.stop();
        assert!(!backend.is_running());
    }

    #[test]
    fn test_failing_launcher_is_launch_failure() {
        let mut backend = backend();
        backend.launch("false", &[]).unwrap();

        assert!(matches!(
            settle(&mut backend),
            Startup::Failed(DisplayError::ProcessLaunchFailure(_))
        ));
    }

    #[test]
    fn test_missing_launcher_is_unavailable() {
        let mut backend = backend();
        assert!(matches!(
            backend.launch("marquee-no-such-launcher", &[]),
            Err(DisplayError::BackendUnavailable(_))
        ));
        assert!(!backend.is_running());
    }
}
