//! In-process decode backend: [`DecodeWorker`] feeding a [`FramePresenter`]

use common::{BackendKind, DisplayError, PlaybackState, PlaybackStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Backend, Health, Startup};
use crate::surface::ScreenSurface;
use crate::video::presenter::FramePresenter;
use crate::video::source::{FALLBACK_FPS, frame_interval};
use crate::video::stats::VideoStats;
use crate::video::worker::{DecodeWorker, WorkerEvent};
use crate::video::SourceOpener;

pub struct InProcessBackend {
    label: String,
    worker: DecodeWorker,
    presenter: Option<FramePresenter>,
    startup_timeout: Duration,
    started: Option<Instant>,
    duration_secs: f64,
}

impl InProcessBackend {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        screen: &str,
        startup_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            label: screen.to_string(),
            worker: DecodeWorker::new(opener, stop_timeout),
            presenter: None,
            startup_timeout,
            started: None,
            duration_secs: 0.0,
        }
    }

    fn drain_events(&mut self) {
        for event in self.worker.poll_events() {
            match event {
                WorkerEvent::Duration(secs) => self.duration_secs = secs,
                WorkerEvent::Position(index) => log::trace!("[{}] Frame {}", self.label, index),
                WorkerEvent::Error(e) => log::warn!("[{}] Decode worker reported: {}", self.label, e),
            }
        }
    }

    fn ensure_presenter(&mut self) -> &mut FramePresenter {
        let fps = self.worker.info().map(|info| info.frame_rate).unwrap_or(0.0);
        let dropped = self.worker.mailbox().frames_dropped_handle();
        let label = self.label.clone();
        self.presenter
            .get_or_insert_with(|| FramePresenter::new(label, VideoStats::new(fps, dropped)))
    }
}

impl Backend for InProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn try_play(&mut self, path: &Path) -> Result<(), DisplayError> {
        self.worker
            .load(path)
            .map_err(|e| DisplayError::BackendUnavailable(format!("{:#}", e)))?;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn poll_startup(&mut self) -> Startup {
        self.drain_events();

        if let Some(error) = self.worker.error() {
            return Startup::Failed(error);
        }
        if self.worker.mailbox().has_new_frame() {
            self.ensure_presenter();
            return Startup::Ready;
        }

        match self.started {
            Some(started) if started.elapsed() >= self.startup_timeout => {
                Startup::Failed(DisplayError::StartupTimeout(format!(
                    "no frame decoded within {}ms",
                    self.startup_timeout.as_millis()
                )))
            }
            Some(_) => Startup::Pending,
            None => Startup::Failed(DisplayError::DecodeError("playback was never started".to_string())),
        }
    }

    fn poll_health(&mut self) -> Health {
        self.drain_events();
        match self.worker.error() {
            Some(DisplayError::DecodeError(message)) => {
                Health::Failed(DisplayError::DecodeError(message))
            }
            Some(other) => Health::Failed(DisplayError::DecodeError(other.to_string())),
            None => Health::Running,
        }
    }

    fn render(&mut self, surface: &mut ScreenSurface) -> bool {
        let Some(frame) = self.worker.mailbox().take() else {
            return false;
        };
        let label = self.label.clone();
        match self.ensure_presenter().on_frame(frame, surface) {
            Ok(drawn) => drawn,
            Err(e) => {
                log::warn!("[{}] Failed to present frame: {:#}", label, e);
                false
            }
        }
    }

    fn redraw(&mut self, surface: &mut ScreenSurface) {
        let target = surface.content_rect().size();
        let label = self.label.clone();
        let presenter = self.ensure_presenter();
        presenter.on_resize(target);
        if let Err(e) = presenter.represent(surface) {
            log::warn!("[{}] Failed to redraw frame: {:#}", label, e);
        }
    }

    fn pause(&mut self) -> Result<(), DisplayError> {
        self.worker.pause();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DisplayError> {
        self.worker.play();
        Ok(())
    }

    fn seek(&mut self, frame: u64) -> Result<(), DisplayError> {
        if self.worker.seek(frame) {
            Ok(())
        } else {
            let total = self.worker.info().map(|info| info.total_frames).unwrap_or(0);
            Err(DisplayError::Unsupported(format!(
                "frame {} is outside 0..{}",
                frame, total
            )))
        }
    }

    fn playback(&self) -> Option<PlaybackStatus> {
        let info = self.worker.info();
        let stats = self.presenter.as_ref().map(|p| p.stats());
        Some(PlaybackStatus {
            state: self.worker.state(),
            position: self.worker.position(),
            total_frames: info.as_ref().map(|i| i.total_frames).unwrap_or(0),
            frame_rate: info.as_ref().map(|i| i.frame_rate).unwrap_or(0.0),
            duration_secs: self.duration_secs,
            frames_rendered: stats.map(|s| s.frames_rendered()).unwrap_or(0),
            frames_dropped: self.worker.mailbox().frames_dropped(),
        })
    }

    fn frame_interval(&self) -> Option<Duration> {
        let fps = self
            .worker
            .info()
            .map(|info| info.frame_rate)
            .unwrap_or(FALLBACK_FPS);
        Some(frame_interval(fps))
    }

    fn request_stop(&mut self) {
        self.worker.request_stop();
    }

    fn stop(&mut self) {
        if !self.worker.stop() {
            log::warn!("[{}] Decode thread detached during stop", self.label);
        }
    }

    fn is_running(&mut self) -> bool {
        matches!(
            self.worker.state(),
            PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Paused
        )
    }
}
