//! External media player backend
//!
//! Tries each configured player in order. A player counts as started once
//! it has stayed alive for the settle window; one that exits earlier makes
//! way for the next player.

use common::{BackendKind, DisplayError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::{Backend, Health, LaunchContext, Startup};
use crate::config::PlayerSpec;
use crate::launcher::{Liveness, ManagedProcess, ProcessTiming, describe_exit, expand_args, resolve_binary};

pub struct ExternalPlayerBackend {
    players: Vec<PlayerSpec>,
    ctx: LaunchContext,
    timing: ProcessTiming,
    path: Option<PathBuf>,
    queue: VecDeque<(PlayerSpec, PathBuf)>,
    process: Option<ManagedProcess>,
    failures: Vec<String>,
}

impl ExternalPlayerBackend {
    pub fn new(players: Vec<PlayerSpec>, ctx: LaunchContext, timing: ProcessTiming) -> Self {
        Self {
            players,
            ctx,
            timing,
            path: None,
            queue: VecDeque::new(),
            process: None,
            failures: Vec::new(),
        }
    }

    /// Launch the next resolvable player; false when none could be spawned
    fn launch_next(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            return false;
        };

        while let Some((player, binary)) = self.queue.pop_front() {
            let mut vars = self.ctx.template_vars();
            vars.push(("path", path.display().to_string()));
            let args = expand_args(&player.args, &vars);

            match ManagedProcess::spawn(&player.name, &binary, &args) {
                Ok(process) => {
                    self.process = Some(process);
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
            "no player stayed running".to_string()
        } else {
            self.failures.join("; ")
        })
    }
}

impl Backend for ExternalPlayerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalPlayer
    }

    fn try_play(&mut self, path: &Path) -> Result<(), DisplayError> {
        self.queue = self
            .players
            .iter()
            .filter_map(|player| {
                resolve_binary(&player.candidates).map(|binary| (player.clone(), binary))
            })
            .collect();

        if self.queue.is_empty() {
            let names: Vec<&str> = self.players.iter().map(|p| p.name.as_str()).collect();
            return Err(DisplayError::BackendUnavailable(format!(
                "no media player found (tried {})",
                names.join(", ")
            )));
        }

        self.path = Some(path.to_path_buf());
        if self.launch_next() {
            Ok(())
        } else {
            Err(self.launch_failure())
        }
    }

    fn poll_startup(&mut self) -> Startup {
        let Some(process) = self.process.as_mut() else {
            return Startup::Failed(self.launch_failure());
        };

        match process.liveness(self.timing.settle) {
            Liveness::Alive => {
                log::info!(
                    "[{}] {} running (pid {})",
                    self.ctx.screen.name,
                    process.name(),
                    process.pid()
                );
                Startup::Ready
            }
            Liveness::Starting => Startup::Pending,
            Liveness::Exited(status) => {
                let message = format!("{} {} during startup", process.name(), describe_exit(status));
                log::warn!("[{}] {}", self.ctx.screen.name, message);
                self.failures.push(message);
                self.process = None;

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
        self.ctx.fullscreen = fullscreen;
        log::debug!(
            "[{}] Player window mode is controlled by the player itself",
            self.ctx.screen.name
        );
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
    }

    fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ManagedProcess::is_alive)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use common::ScreenInfo;
    use std::time::{Duration, Instant};

    fn ctx() -> LaunchContext {
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
        }
    }

    fn timing() -> ProcessTiming {
        ProcessTiming {
            settle: Duration::from_millis(200),
            grace: Duration::from_millis(500),
        }
    }

    fn shell_player(name: &str, script: &str) -> PlayerSpec {
        PlayerSpec {
            name: name.to_string(),
            candidates: vec!["/bin/sh".to_string()],
            args: vec!["-c".to_string(), script.to_string(), "{path}".to_string()],
        }
    }

    fn settle(backend: &mut ExternalPlayerBackend) -> Startup {
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
    fn test_no_player_resolvable() {
        let players = vec![PlayerSpec {
            name: "ghost".to_string(),
            candidates: vec!["/no/such/player".to_string()],
            args: vec!["{path}".to_string()],
        }];
        let mut backend = ExternalPlayerBackend::new(players, ctx(), timing());

        let result = backend.try_play(Path::new("/tmp/clip.mp4"));
        assert!(matches!(result, Err(DisplayError::BackendUnavailable(_))));
    }

    #[test]
    fn test_early_exit_falls_through_to_next_player() {
        let players = vec![
            shell_player("crashy", "exit 1"),
            shell_player("steady", "sleep 30"),
        ];
        let mut backend = ExternalPlayerBackend::new(players, ctx(), timing());

        backend.try_play(Path::new("/tmp/clip.mp4")).unwrap();
        assert_eq!(settle(&mut backend), Startup::Ready);
        assert!(backend.is_running());
        assert_eq!(backend.failures.len(), 1);

        backend.request_stop();
        backend.stop();
        assert!(!backend.is_running());
    }

    #[test]
    fn test_every_player_exits_early() {
        let players = vec![shell_player("a", "exit 2"), shell_player("b", "exit 3")];
        let mut backend = ExternalPlayerBackend::new(players, ctx(), timing());

        backend.try_play(Path::new("/tmp/clip.mp4")).unwrap();
        match settle(&mut backend) {
            Startup::Failed(DisplayError::ProcessLaunchFailure(message)) => {
                assert!(message.contains("status 2"));
                assert!(message.contains("status 3"));
            }
            other => panic!("unexpected startup result: {:?}", other),
        }
    }

    #[test]
    fn test_player_crash_after_startup_fails_health() {
        let players = vec![shell_player("flaky", "sleep 0.4; exit 4")];
        let mut backend = ExternalPlayerBackend::new(players, ctx(), timing());

        backend.try_play(Path::new("/tmp/clip.mp4")).unwrap();
        assert_eq!(settle(&mut backend), Startup::Ready);

        let deadline = Instant::now() + Duration::from_secs(5);
        let health = loop {
            match backend.poll_health() {
                Health::Running if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                other => break other,
            }
        };
        assert!(matches!(health, Health::Failed(DisplayError::ProcessLaunchFailure(_))));
    }
}
