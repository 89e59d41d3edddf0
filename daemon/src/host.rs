//! Content surface host
//!
//! One slot per screen: a [`ScreenSurface`] and at most one active session.
//! Everything here runs on the display loop thread. Video sessions start as
//! a [`Cascade`] that is advanced once per tick and become a running backend
//! when one reports ready; replaced backends go to the [`Reaper`].

use anyhow::Result;
use common::{
    ApplyReport, BackendAttempt, BackendKind, Content, ContentEvent, ContentKind, DisplayError, Remedy,
    ScaleMode, ScreenInfo, ScreenStatus,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use crate::backend::{Backend, Health, LaunchContext};
use crate::diagnostics::{self, DiagnosticReport, ProbeTask};
use crate::imaging::ImageRenderer;
use crate::playback::{Cascade, CascadeStep, PlaybackOrchestrator};
use crate::reaper::Reaper;
use crate::surface::{ChromeStyle, ScreenSurface};
use crate::text::{Card, TextRenderer};

const MAX_FRAME_DELAY: Duration = Duration::from_millis(50);
const MIN_FRAME_DELAY: Duration = Duration::from_millis(1);
const STARTUP_POLL: Duration = Duration::from_millis(10);

/// Reply channel for a `SetContent` that settles later
pub type ApplyReply = oneshot::Sender<Result<ApplyReport, DisplayError>>;

#[derive(Debug, Clone)]
pub struct HostSettings {
    /// ffprobe binary for the diagnostic view, `None` disables probing
    pub ffprobe: Option<String>,
    pub repair_tool: Vec<String>,
    pub default_scale: ScaleMode,
    pub start_fullscreen: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            ffprobe: None,
            repair_tool: Vec::new(),
            default_scale: ScaleMode::Fit,
            start_fullscreen: false,
        }
    }
}

/// What `set_content` did
#[derive(Debug)]
pub enum SetOutcome {
    Applied(ApplyReport),
    /// A video cascade is running; the report follows when it settles
    Pending,
}

enum Phase {
    /// Text or image already drawn
    Static,
    Starting(Cascade),
    Running {
        backend: Box<dyn Backend>,
        cascade: Option<Cascade>,
    },
    /// Report card, with ffprobe still running while the task is set
    Diagnostic(DiagnosticReport, Option<ProbeTask>),
    /// A card replacing content that stopped on its own
    Notice(Card),
}

struct ActiveSession {
    content: Content,
    scale: ScaleMode,
    phase: Phase,
    reply: Option<ApplyReply>,
    announced: bool,
}

impl ActiveSession {
    fn attempts(&self) -> Vec<BackendAttempt> {
        match &self.phase {
            Phase::Starting(cascade)
            | Phase::Running {
                cascade: Some(cascade),
                ..
            } => cascade.attempts().to_vec(),
            Phase::Diagnostic(report, _) => report.attempts.clone(),
            _ => Vec::new(),
        }
    }

    fn video_path(&self) -> Option<PathBuf> {
        match &self.phase {
            Phase::Starting(cascade)
            | Phase::Running {
                cascade: Some(cascade),
                ..
            } => Some(cascade.path().to_path_buf()),
            Phase::Diagnostic(report, _) => Some(report.path.clone()),
            _ => None,
        }
    }
}

struct ScreenSlot {
    surface: ScreenSurface,
    session: Option<ActiveSession>,
}

pub struct ContentSurfaceHost {
    slots: Vec<ScreenSlot>,
    orchestrator: PlaybackOrchestrator,
    settings: HostSettings,
    images: ImageRenderer,
    text: Option<TextRenderer>,
    reaper: Reaper,
    events: broadcast::Sender<ContentEvent>,
}

impl ContentSurfaceHost {
    pub fn new(
        screens: Vec<ScreenInfo>,
        chrome: ChromeStyle,
        orchestrator: PlaybackOrchestrator,
        settings: HostSettings,
        events: broadcast::Sender<ContentEvent>,
    ) -> Result<Self> {
        let slots = screens
            .into_iter()
            .map(|info| {
                let mut surface = ScreenSurface::new(info, chrome);
                surface.set_fullscreen(settings.start_fullscreen);
                ScreenSlot {
                    surface,
                    session: None,
                }
            })
            .collect();

        Ok(Self {
            slots,
            orchestrator,
            settings,
            images: ImageRenderer::new(),
            text: None,
            reaper: Reaper::new()?,
            events,
        })
    }

    pub fn screens(&self) -> Vec<ScreenInfo> {
        self.slots.iter().map(|slot| slot.surface.info().clone()).collect()
    }

    pub fn backends(&self) -> &[BackendKind] {
        self.orchestrator.ranked()
    }

    /// Surfaces in screen order, for the compositor to present
    pub fn surfaces_mut(&mut self) -> impl Iterator<Item = &mut ScreenSurface> {
        self.slots.iter_mut().map(|slot| &mut slot.surface)
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    fn index(&self, screen: &str) -> Result<usize, DisplayError> {
        self.slots
            .iter()
            .position(|slot| slot.surface.info().name == screen)
            .ok_or_else(|| DisplayError::UnknownScreen(screen.to_string()))
    }

    fn notify(&self, event: ContentEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Replace the content of `screen`
    pub fn set_content(
        &mut self,
        screen: &str,
        content: Content,
        scale: Option<ScaleMode>,
    ) -> Result<SetOutcome, DisplayError> {
        let idx = self.index(screen)?;
        self.teardown(idx);

        let scale = scale.unwrap_or(self.settings.default_scale);
        self.slots[idx]
            .surface
            .open()
            .map_err(|e| DisplayError::Io(format!("{:#}", e)))?;
        log::info!("[{}] Showing {} {}", screen, content.kind().name(), content.summary());

        match self.mount(idx, &content, scale) {
            Ok((phase, outcome)) => {
                let announced = matches!(outcome, SetOutcome::Applied(_));
                if announced {
                    self.notify(ContentEvent::Applied {
                        screen: screen.to_string(),
                        kind: content.kind(),
                        summary: content.summary(),
                    });
                }
                self.slots[idx].session = Some(ActiveSession {
                    content,
                    scale,
                    phase,
                    reply: None,
                    announced,
                });
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("[{}] Cannot show {}: {}", screen, content.summary(), e);
                self.slots[idx].surface.clear_content();
                Err(e)
            }
        }
    }

    fn mount(&mut self, idx: usize, content: &Content, scale: ScaleMode) -> Result<(Phase, SetOutcome), DisplayError> {
        let screen = self.slots[idx].surface.info().clone();
        let fullscreen = self.slots[idx].surface.is_fullscreen();
        let applied = |backend: Option<BackendKind>| {
            SetOutcome::Applied(ApplyReport {
                screen: screen.name.clone(),
                kind: content.kind(),
                backend,
                attempts: Vec::new(),
                diagnostic: false,
            })
        };

        match content {
            Content::Text(_) | Content::Image(_) => {
                self.paint_static(idx, content, scale)?;
                Ok((Phase::Static, applied(None)))
            }
            Content::Video(path) => {
                let cascade = self.orchestrator.play(&screen, fullscreen, path)?;
                let card = Card::loading(&file_label(cascade.path()));
                self.paint_card(idx, &card);
                Ok((Phase::Starting(cascade), SetOutcome::Pending))
            }
            Content::Web(url) => {
                let ctx = LaunchContext {
                    screen: screen.clone(),
                    fullscreen,
                };
                let backend = self.orchestrator.factory().open_page(&ctx, url)?;
                self.paint_card(idx, &playing_card(content, backend.kind()));
                Ok((
                    Phase::Running {
                        backend,
                        cascade: None,
                    },
                    applied(Some(BackendKind::WebEmbedded)),
                ))
            }
        }
    }

    /// Deliver the eventual result of a pending `set_content`
    pub fn attach_reply(&mut self, screen: &str, reply: ApplyReply) {
        let session = self
            .index(screen)
            .ok()
            .and_then(|idx| self.slots[idx].session.as_mut());
        match session {
            Some(session) if !session.announced => session.reply = Some(reply),
            _ => {
                let _ = reply.send(Err(DisplayError::Cancelled(format!(
                    "{} has no pending playback",
                    screen
                ))));
            }
        }
    }

    /// Remove content but keep the surface open
    pub fn clear(&mut self, screen: &str) -> Result<(), DisplayError> {
        let idx = self.index(screen)?;
        let had_content = self.teardown(idx);
        self.slots[idx].surface.clear_content();
        if had_content {
            self.notify(ContentEvent::Cleared {
                screen: screen.to_string(),
            });
        }
        Ok(())
    }

    /// Tear down the session and release the surface. Idempotent.
    pub fn close(&mut self, screen: &str) -> Result<(), DisplayError> {
        let idx = self.index(screen)?;
        let had_content = self.teardown(idx);
        self.slots[idx].surface.close();
        if had_content {
            log::info!("[{}] Closed", screen);
            self.notify(ContentEvent::Cleared {
                screen: screen.to_string(),
            });
        }
        Ok(())
    }

    pub fn enter_fullscreen(&mut self, screen: &str) -> Result<(), DisplayError> {
        self.set_fullscreen(screen, true)
    }

    pub fn exit_fullscreen(&mut self, screen: &str) -> Result<(), DisplayError> {
        self.set_fullscreen(screen, false)
    }

    fn set_fullscreen(&mut self, screen: &str, fullscreen: bool) -> Result<(), DisplayError> {
        let idx = self.index(screen)?;
        let slot = &mut self.slots[idx];
        slot.surface
            .open()
            .map_err(|e| DisplayError::Io(format!("{:#}", e)))?;
        if !slot.surface.set_fullscreen(fullscreen) {
            return Ok(());
        }

        log::info!(
            "[{}] {} fullscreen",
            screen,
            if fullscreen { "Entered" } else { "Left" }
        );
        if let Some(session) = slot.session.as_mut() {
            match &mut session.phase {
                Phase::Starting(cascade) => cascade.set_fullscreen(fullscreen),
                Phase::Running { backend, cascade } => {
                    backend.set_fullscreen(fullscreen);
                    if let Some(cascade) = cascade {
                        cascade.set_fullscreen(fullscreen);
                    }
                }
                _ => {}
            }
        }
        self.repaint(idx);
        Ok(())
    }

    pub fn pause(&mut self, screen: &str) -> Result<(), DisplayError> {
        self.with_backend(screen, |backend| backend.pause())
    }

    pub fn resume(&mut self, screen: &str) -> Result<(), DisplayError> {
        self.with_backend(screen, |backend| backend.resume())
    }

    pub fn seek(&mut self, screen: &str, frame: u64) -> Result<(), DisplayError> {
        self.with_backend(screen, |backend| backend.seek(frame))
    }

    fn with_backend(
        &mut self,
        screen: &str,
        action: impl FnOnce(&mut dyn Backend) -> Result<(), DisplayError>,
    ) -> Result<(), DisplayError> {
        let idx = self.index(screen)?;
        match self.slots[idx].session.as_mut().map(|s| &mut s.phase) {
            Some(Phase::Running { backend, .. }) => action(backend.as_mut()),
            _ => Err(DisplayError::Unsupported(format!("nothing is playing on {}", screen))),
        }
    }

    pub fn run_remedy(&mut self, screen: &str, remedy: Remedy) -> Result<(), DisplayError> {
        let idx = self.index(screen)?;
        let path = self.slots[idx]
            .session
            .as_ref()
            .and_then(ActiveSession::video_path)
            .ok_or_else(|| DisplayError::Unsupported(format!("no video on {}", screen)))?;
        diagnostics::run_remedy(remedy, &path, &self.settings.repair_tool)
    }

    /// Content currently mounted on each screen
    /// What each screen shows and the scale mode it was mounted with
    pub fn contents(&self) -> Vec<(String, Content, ScaleMode)> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let session = slot.session.as_ref()?;
                Some((
                    slot.surface.info().name.clone(),
                    session.content.clone(),
                    session.scale,
                ))
            })
            .collect()
    }

    pub fn status(&self) -> Vec<ScreenStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let session = slot.session.as_ref();
                let (backend, playback) = match session.map(|s| &s.phase) {
                    Some(Phase::Running { backend, .. }) => (Some(backend.kind()), backend.playback()),
                    _ => (None, None),
                };
                ScreenStatus {
                    screen: slot.surface.info().name.clone(),
                    content: session.map(|s| s.content.clone()),
                    backend,
                    fullscreen: slot.surface.is_fullscreen(),
                    closed: !slot.surface.is_open(),
                    diagnostic: matches!(session.map(|s| &s.phase), Some(Phase::Diagnostic(..))),
                    playback,
                    attempts: session.map(ActiveSession::attempts).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// How long the display loop may sleep before the next tick
    pub fn next_frame_delay(&self) -> Duration {
        let mut delay = MAX_FRAME_DELAY;
        for session in self.slots.iter().filter_map(|slot| slot.session.as_ref()) {
            match &session.phase {
                Phase::Starting(_) => delay = delay.min(STARTUP_POLL),
                Phase::Running { backend, .. } => {
                    if let Some(interval) = backend.frame_interval() {
                        delay = delay.min(interval);
                    }
                }
                _ => {}
            }
        }
        delay.clamp(MIN_FRAME_DELAY, MAX_FRAME_DELAY)
    }

    /// Advance cascades, check backend health and draw new frames
    pub fn tick(&mut self) {
        for idx in 0..self.slots.len() {
            self.tick_slot(idx);
        }
    }

    fn tick_slot(&mut self, idx: usize) {
        let Some(mut session) = self.slots[idx].session.take() else {
            return;
        };

        session.phase = match std::mem::replace(&mut session.phase, Phase::Static) {
            Phase::Starting(mut cascade) => {
                let step = cascade.step();
                for backend in cascade.take_retired() {
                    self.reaper.dispose(backend);
                }
                match step {
                    CascadeStep::Pending => Phase::Starting(cascade),
                    CascadeStep::Ready => match cascade.take_backend() {
                        Some(backend) => self.on_ready(idx, &mut session, backend, cascade),
                        None => Phase::Starting(cascade),
                    },
                    CascadeStep::Exhausted => self.on_exhausted(idx, &mut session, cascade),
                }
            }
            Phase::Running {
                mut backend,
                cascade,
            } => match backend.poll_health() {
                Health::Running => {
                    backend.render(&mut self.slots[idx].surface);
                    Phase::Running { backend, cascade }
                }
                Health::Ended => {
                    let screen = self.slots[idx].surface.info().name.clone();
                    log::info!("[{}] {} backend ended playback", screen, backend.kind().name());
                    self.reaper.dispose(backend);
                    if let Some(mut cascade) = cascade {
                        for backend in cascade.cancel() {
                            self.reaper.dispose(backend);
                        }
                    }
                    self.slots[idx].surface.clear_content();
                    self.notify(ContentEvent::Cleared { screen });
                    return;
                }
                Health::Failed(error) => self.on_runtime_failure(idx, backend, cascade, error),
            },
            Phase::Diagnostic(mut report, Some(task)) => match task.poll() {
                Some(probe) => {
                    report.finish_probe(probe);
                    self.paint_card(idx, &report.card());
                    Phase::Diagnostic(report, None)
                }
                None => Phase::Diagnostic(report, Some(task)),
            },
            other => other,
        };

        self.slots[idx].session = Some(session);
    }

    fn on_ready(
        &mut self,
        idx: usize,
        session: &mut ActiveSession,
        mut backend: Box<dyn Backend>,
        cascade: Cascade,
    ) -> Phase {
        let kind = backend.kind();
        if kind == BackendKind::InProcess {
            let surface = &mut self.slots[idx].surface;
            surface.clear_content();
            backend.render(surface);
        } else {
            self.paint_card(idx, &playing_card(&session.content, kind));
        }

        let report = ApplyReport {
            screen: self.slots[idx].surface.info().name.clone(),
            kind: ContentKind::Video,
            backend: Some(kind),
            attempts: cascade.attempts().to_vec(),
            diagnostic: false,
        };
        self.settle(session, report);

        Phase::Running {
            backend,
            cascade: Some(cascade),
        }
    }

    fn on_exhausted(&mut self, idx: usize, session: &mut ActiveSession, mut cascade: Cascade) -> Phase {
        for backend in cascade.cancel() {
            self.reaper.dispose(backend);
        }

        let probe = self
            .settings
            .ffprobe
            .as_deref()
            .map(|ffprobe| ProbeTask::spawn(ffprobe, cascade.path()));
        let report = DiagnosticReport::new(
            cascade.path(),
            cascade.attempts().to_vec(),
            probe.is_some(),
            !self.settings.repair_tool.is_empty(),
        );
        self.paint_card(idx, &report.card());

        let apply = ApplyReport {
            screen: self.slots[idx].surface.info().name.clone(),
            kind: ContentKind::Video,
            backend: None,
            attempts: report.attempts.clone(),
            diagnostic: true,
        };
        self.settle(session, apply);
        Phase::Diagnostic(report, probe)
    }

    fn on_runtime_failure(
        &mut self,
        idx: usize,
        backend: Box<dyn Backend>,
        cascade: Option<Cascade>,
        error: DisplayError,
    ) -> Phase {
        let screen = self.slots[idx].surface.info().name.clone();
        let kind = backend.kind();
        log::warn!("[{}] {} backend failed during playback: {}", screen, kind.name(), error);
        self.reaper.dispose(backend);

        match cascade {
            Some(mut cascade) => {
                cascade.record_runtime_failure(kind, &error);
                let card = Card::loading(&file_label(cascade.path()));
                self.paint_card(idx, &card);
                Phase::Starting(cascade)
            }
            None => {
                let card = Card::report("Content stopped", vec![error.to_string()]);
                self.paint_card(idx, &card);
                Phase::Notice(card)
            }
        }
    }

    /// Answer the pending request and announce the content once
    fn settle(&self, session: &mut ActiveSession, report: ApplyReport) {
        if let Some(reply) = session.reply.take() {
            let _ = reply.send(Ok(report.clone()));
        }
        if !session.announced {
            session.announced = true;
            let summary = if report.diagnostic {
                format!("{} (cannot play)", session.content.summary())
            } else {
                session.content.summary()
            };
            self.notify(ContentEvent::Applied {
                screen: report.screen,
                kind: ContentKind::Video,
                summary,
            });
        }
    }

    /// Stop the session on `idx`; returns whether there was one
    fn teardown(&mut self, idx: usize) -> bool {
        let Some(session) = self.slots[idx].session.take() else {
            return false;
        };
        let screen = self.slots[idx].surface.info().name.clone();

        if let Some(reply) = session.reply {
            let _ = reply.send(Err(DisplayError::Cancelled(format!(
                "content on {} was replaced before playback started",
                screen
            ))));
        }

        match session.phase {
            Phase::Starting(mut cascade) => {
                for backend in cascade.cancel() {
                    self.reaper.dispose(backend);
                }
            }
            Phase::Running { backend, cascade } => {
                log::debug!("[{}] Stopping {} backend", screen, backend.kind().name());
                self.reaper.dispose(backend);
                if let Some(mut cascade) = cascade {
                    for backend in cascade.cancel() {
                        self.reaper.dispose(backend);
                    }
                }
            }
            _ => {}
        }
        true
    }

    /// Redraw the content of `idx` after a geometry change
    fn repaint(&mut self, idx: usize) {
        let Some(mut session) = self.slots[idx].session.take() else {
            self.slots[idx].surface.clear_content();
            return;
        };

        match &mut session.phase {
            Phase::Static => {
                if let Err(e) = self.paint_static(idx, &session.content, session.scale) {
                    log::warn!("Failed to redraw {}: {}", session.content.summary(), e);
                }
            }
            Phase::Starting(cascade) => {
                let card = Card::loading(&file_label(cascade.path()));
                self.paint_card(idx, &card);
            }
            Phase::Running { backend, .. } => {
                if backend.kind() == BackendKind::InProcess {
                    let surface = &mut self.slots[idx].surface;
                    surface.clear_content();
                    backend.redraw(surface);
                } else {
                    let card = playing_card(&session.content, backend.kind());
                    self.paint_card(idx, &card);
                }
            }
            Phase::Diagnostic(report, _) => {
                let card = report.card();
                self.paint_card(idx, &card);
            }
            Phase::Notice(card) => {
                let card = card.clone();
                self.paint_card(idx, &card);
            }
        }

        self.slots[idx].session = Some(session);
    }

    fn paint_static(&mut self, idx: usize, content: &Content, scale: ScaleMode) -> Result<(), DisplayError> {
        match content {
            Content::Text(text) => {
                let width = self.slots[idx].surface.content_rect().width;
                self.paint_card(idx, &Card::message(text, width));
                Ok(())
            }
            Content::Image(raw) => {
                let path = ImageRenderer::resolve(raw)?;
                let surface = &mut self.slots[idx].surface;
                let target = surface.content_rect().size();
                let pixels = self
                    .images
                    .render(&path, target, scale)
                    .map_err(|e| DisplayError::UnreadableFile(format!("{:#}", e)))?;
                surface
                    .blit_content(&pixels, target.0, target.1, 0, 0)
                    .map_err(|e| DisplayError::Io(format!("{:#}", e)))
            }
            _ => Ok(()),
        }
    }

    fn paint_card(&mut self, idx: usize, card: &Card) {
        let surface = &mut self.slots[idx].surface;
        let (width, height) = surface.content_rect().size();
        if width == 0 || height == 0 || !surface.is_open() {
            return;
        }

        let renderer = self.text.get_or_insert_with(TextRenderer::new);
        match renderer.render(card, width, height) {
            Ok(pixels) => {
                if let Err(e) = surface.blit_content(&pixels, width, height, 0, 0) {
                    log::warn!("Failed to draw card: {:#}", e);
                }
            }
            Err(e) => log::warn!("Failed to render card: {:#}", e),
        }
    }

    /// Stop everything and wait for the reaper to finish
    pub fn shutdown(&mut self) {
        log::info!("Shutting down content host");
        for idx in 0..self.slots.len() {
            self.teardown(idx);
            self.slots[idx].surface.close();
        }
        log::info!("Waiting for {} backend(s) to stop", self.reaper.pending());
        self.reaper.shutdown();
    }
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Card shown while another process displays the content
fn playing_card(content: &Content, backend: BackendKind) -> Card {
    let mut card = Card::loading(&content.summary());
    card.title = Some(format!("Playing in {} window", backend.name()));
    card
}
