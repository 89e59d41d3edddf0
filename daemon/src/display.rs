//! The display loop
//!
//! Owns the [`ContentSurfaceHost`] on one blocking thread. Commands arrive
//! over an unbounded channel and are drained between ticks. After each tick
//! damaged surfaces are presented through the compositor, then the loop
//! sleeps for the host's next frame delay.

use common::{ApplyReport, Command, Content, DaemonStatus, DisplayError, Response, ScaleMode};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::host::{ContentSurfaceHost, SetOutcome};
use crate::log_and_continue;
use crate::profiles::{Assignment, ProfileStore};
use crate::wayland::Compositor;

/// Work for the display loop
#[derive(Debug)]
pub enum DisplayCommand {
    /// Answered when the content is mounted, which for video means when
    /// the backend cascade settles
    SetContent {
        screen: String,
        content: Content,
        scale: Option<ScaleMode>,
        reply: oneshot::Sender<Result<ApplyReport, DisplayError>>,
    },
    /// Any other screen, status or profile command
    Request {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    Shutdown,
}

pub struct DisplayLoop {
    host: ContentSurfaceHost,
    profiles: ProfileStore,
    /// None when running headless
    compositor: Option<Compositor>,
    started: Instant,
}

impl DisplayLoop {
    pub fn new(
        host: ContentSurfaceHost,
        profiles: ProfileStore,
        compositor: Option<Compositor>,
    ) -> Self {
        Self {
            host,
            profiles,
            compositor,
            started: Instant::now(),
        }
    }

    /// Run until `Shutdown` arrives or every sender is gone
    pub fn run(mut self, mut rx: mpsc::UnboundedReceiver<DisplayCommand>) {
        log::info!("Display loop started with {} screen(s)", self.host.screens().len());

        'outer: loop {
            loop {
                match rx.try_recv() {
                    Ok(DisplayCommand::Shutdown) => break 'outer,
                    Ok(command) => self.handle(command),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        log::warn!("Command channel closed");
                        break 'outer;
                    }
                }
            }

            self.host.tick();
            self.present();
            std::thread::sleep(self.host.next_frame_delay());
        }

        self.host.shutdown();
        log::info!("Display loop stopped");
    }

    fn present(&mut self) {
        let Some(compositor) = self.compositor.as_mut() else {
            return;
        };
        if let Err(e) = compositor.present(self.host.surfaces_mut()) {
            log::error!("Lost the compositor connection: {:#}", e);
            log::warn!("Continuing headless; screens are no longer shown");
            self.compositor = None;
        }
    }

    fn handle(&mut self, command: DisplayCommand) {
        match command {
            DisplayCommand::SetContent {
                screen,
                content,
                scale,
                reply,
            } => match self.host.set_content(&screen, content, scale) {
                Ok(SetOutcome::Applied(report)) => {
                    let _ = reply.send(Ok(report));
                }
                Ok(SetOutcome::Pending) => self.host.attach_reply(&screen, reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            DisplayCommand::Request { command, reply } => {
                let response = self.execute(command);
                let _ = reply.send(response);
            }
            DisplayCommand::Shutdown => {}
        }
    }

    /// Run a command that completes synchronously on the loop
    pub fn execute(&mut self, command: Command) -> Response {
        log::debug!("Display loop handling {:?}", command);
        let result = match command {
            Command::Clear { screen } => self.host.clear(&screen),
            Command::EnterFullscreen { screen } => self.host.enter_fullscreen(&screen),
            Command::ExitFullscreen { screen } => self.host.exit_fullscreen(&screen),
            Command::Close { screen } => self.host.close(&screen),
            Command::Pause { screen } => self.host.pause(&screen),
            Command::Resume { screen } => self.host.resume(&screen),
            Command::Seek { screen, frame } => self.host.seek(&screen, frame),
            Command::RunRemedy { screen, remedy } => self.host.run_remedy(&screen, remedy),
            Command::Query => {
                return Response::Status(DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.started.elapsed().as_secs(),
                    backends: self.host.backends().to_vec(),
                    screens: self.host.status(),
                });
            }
            Command::ListScreens => return Response::Screens(self.host.screens()),
            Command::ListProfiles => return Response::Profiles(self.profiles.names()),
            Command::SaveProfile { name } => self.save_profile(&name),
            Command::ApplyProfile { name } => self.apply_profile(&name),
            Command::DeleteProfile { name } => match self.profiles.delete(&name) {
                Ok(true) => Ok(()),
                Ok(false) => Err(DisplayError::Config(format!("no profile named '{}'", name))),
                Err(e) => Err(DisplayError::Config(format!("{:#}", e))),
            },
            Command::SetContent { screen, content, scale } => self
                .host
                .set_content(&screen, content, scale)
                .map(|_| ()),
            Command::Watch | Command::Ping | Command::Kill => Err(DisplayError::Unsupported(
                "handled by the IPC server".to_string(),
            )),
        };

        match result {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e),
        }
    }

    fn save_profile(&mut self, name: &str) -> Result<(), DisplayError> {
        let assignments = self
            .host
            .contents()
            .into_iter()
            .map(|(screen, content, scale)| Assignment {
                screen,
                content,
                scale: Some(scale),
            })
            .collect();
        self.profiles
            .save(name, assignments)
            .map_err(|e| DisplayError::Config(format!("{:#}", e)))
    }

    /// Mount every assignment of a profile; video replies are not awaited
    pub fn apply_profile(&mut self, name: &str) -> Result<(), DisplayError> {
        let assignments = self
            .profiles
            .get(name)
            .ok_or_else(|| DisplayError::Config(format!("no profile named '{}'", name)))?
            .to_vec();

        log::info!("Applying profile '{}' ({} screen(s))", name, assignments.len());
        let mut first_error = None;
        for assignment in assignments {
            if let Err(e) = self
                .host
                .set_content(&assignment.screen, assignment.content, assignment.scale)
            {
                log::warn!("Profile '{}': {} failed: {}", name, assignment.screen, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Apply the configured startup profile, if any
    pub fn apply_startup_profile(&mut self, name: Option<&str>) {
        if let Some(name) = name {
            log_and_continue!(self.apply_profile(name), format!("apply startup profile '{}'", name));
        }
    }
}
