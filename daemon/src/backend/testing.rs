//! Scripted backends for cascade and host tests

use common::{BackendKind, DisplayError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Backend, BackendFactory, Health, InProcessBackend, LaunchContext, Startup};
use crate::video::testing::PatternOpener;

/// How a scripted backend behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// `try_play` fails immediately
    RejectPlay(DisplayError),
    /// Pending for `polls` startup polls, then ready
    ReadyAfter(usize),
    /// Pending for `polls` startup polls, then failed
    FailAfter(usize, DisplayError),
}

/// Shared observation counters
#[derive(Default)]
pub struct Probe {
    pub created: AtomicUsize,
    pub stopped: AtomicUsize,
    pub stop_requested: AtomicUsize,
    health: Mutex<HashMap<BackendKind, Health>>,
}

impl Probe {
    /// Force what running backends of `kind` report from now on
    pub fn set_health(&self, kind: BackendKind, health: Health) {
        if let Ok(mut map) = self.health.lock() {
            map.insert(kind, health);
        }
    }

    fn health(&self, kind: BackendKind) -> Health {
        self.health
            .lock()
            .ok()
            .and_then(|map| map.get(&kind).cloned())
            .unwrap_or(Health::Running)
    }
}

pub struct ScriptedBackend {
    kind: BackendKind,
    script: Script,
    polls: usize,
    running: bool,
    probe: Arc<Probe>,
}

impl Backend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn try_play(&mut self, _path: &Path) -> Result<(), DisplayError> {
        if let Script::RejectPlay(e) = &self.script {
            return Err(e.clone());
        }
        self.running = true;
        Ok(())
    }

    fn poll_startup(&mut self) -> Startup {
        self.polls += 1;
        match &self.script {
            Script::RejectPlay(e) => Startup::Failed(e.clone()),
            Script::ReadyAfter(n) if self.polls > *n => Startup::Ready,
            Script::FailAfter(n, e) if self.polls > *n => {
                self.running = false;
                Startup::Failed(e.clone())
            }
            _ => Startup::Pending,
        }
    }

    fn poll_health(&mut self) -> Health {
        self.probe.health(self.kind)
    }

    fn request_stop(&mut self) {
        self.probe.stop_requested.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.running = false;
        self.probe.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&mut self) -> bool {
        self.running
    }
}

/// Factory handing out scripted backends; in-process can be a real decode
/// pipeline over a [`PatternOpener`].
pub struct ScriptedFactory {
    scripts: HashMap<BackendKind, Script>,
    pattern: Option<PatternOpener>,
    pub probe: Arc<Probe>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            pattern: None,
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn with(mut self, kind: BackendKind, script: Script) -> Self {
        self.scripts.insert(kind, script);
        self
    }

    /// Use a real in-process backend decoding synthetic frames
    pub fn with_pattern(mut self, opener: PatternOpener) -> Self {
        self.pattern = Some(opener);
        self
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, kind: BackendKind, ctx: &LaunchContext) -> Box<dyn Backend> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);

        if kind == BackendKind::InProcess
            && let Some(opener) = &self.pattern
        {
            return Box::new(InProcessBackend::new(
                Arc::new(opener.clone()),
                &ctx.screen.name,
                Duration::from_secs(3),
                Duration::from_millis(500),
            ));
        }

        let script = self.scripts.get(&kind).cloned().unwrap_or_else(|| {
            Script::RejectPlay(DisplayError::BackendUnavailable(format!(
                "{} not scripted",
                kind.name()
            )))
        });
        Box::new(ScriptedBackend {
            kind,
            script,
            polls: 0,
            running: false,
            probe: Arc::clone(&self.probe),
        })
    }

    fn open_page(&self, _ctx: &LaunchContext, url: &str) -> Result<Box<dyn Backend>, DisplayError> {
        if url.starts_with("bad:") {
            return Err(DisplayError::BackendUnavailable("no web engine".to_string()));
        }
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBackend {
            kind: BackendKind::WebEmbedded,
            script: Script::ReadyAfter(0),
            polls: 0,
            running: true,
            probe: Arc::clone(&self.probe),
        }))
    }
}
