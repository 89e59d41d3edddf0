//! Deferred backend teardown
//!
//! The display loop only calls `request_stop` on a backend it replaces. The
//! blocking `stop` (thread join, process kill) happens here, on a dedicated
//! thread, so switching content never stalls other screens.

use anyhow::{Context, Result};
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::Backend;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count += 1;
        }
    }

    fn done(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.idle.notify_all();
            }
        }
    }
}

/// Marks one disposal finished when dropped, including on unwind
struct Finished<'a>(&'a Pending);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

pub struct Reaper {
    tx: Option<Sender<Box<dyn Backend>>>,
    pending: Arc<Pending>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Box<dyn Backend>>();
        let pending = Arc::new(Pending::default());
        let worker_pending = Arc::clone(&pending);

        let thread = std::thread::Builder::new()
            .name("reaper".into())
            .spawn(move || {
                for backend in rx {
                    let _finished = Finished(&worker_pending);
                    let kind = backend.kind();
                    let start = Instant::now();
                    let stopped = std::panic::catch_unwind(AssertUnwindSafe(move || {
                        let mut backend = backend;
                        backend.stop();
                    }));
                    match stopped {
                        Ok(()) => log::debug!(
                            "Stopped {} backend in {}ms",
                            kind.name(),
                            start.elapsed().as_millis()
                        ),
                        Err(_) => log::error!("{} backend panicked while stopping", kind.name()),
                    }
                }
            })
            .context("Failed to spawn reaper thread")?;

        Ok(Self {
            tx: Some(tx),
            pending,
            thread: Some(thread),
        })
    }

    /// Request a stop now and finish it in the background
    pub fn dispose(&self, mut backend: Box<dyn Backend>) {
        backend.request_stop();
        self.pending.add();

        let Some(tx) = self.tx.as_ref() else {
            backend.stop();
            self.pending.done();
            return;
        };
        if let Err(mpsc::SendError(mut backend)) = tx.send(backend) {
            log::warn!("Reaper thread gone, stopping {} backend inline", backend.kind().name());
            backend.stop();
            self.pending.done();
        }
    }

    /// Backends handed over but not fully stopped yet
    pub fn pending(&self) -> usize {
        self.pending.count.lock().map(|c| *c).unwrap_or(0)
    }

    /// Wait until every disposed backend has stopped
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let Ok(count) = self.pending.count.lock() else {
            return false;
        };
        match self
            .pending
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
        {
            Ok((count, _)) => *count == 0,
            Err(_) => false,
        }
    }

    /// Finish outstanding stops and end the thread
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Reaper thread panicked");
            } else {
                log::info!("✓ All backends stopped");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
