//! Decode worker
//!
//! Owns a [`FrameSource`] on a dedicated thread and pulls frames at the
//! source's natural rate. Frames go into a [`FrameMailbox`]; duration,
//! position and errors go onto a bounded event channel. Nothing here ever
//! touches a display surface.
//!
//! State machine:
//!
//! ```text
//! Stopped --load--> Loading --opened--> Playing <--pause/play--> Paused
//!                      |                   |                       |
//!                      +--open failed------+--decode error---------+--> Error
//! Playing/Paused --stop--> Stopped
//! ```

use anyhow::{Context, Result};
use common::{DisplayError, PlaybackState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::mailbox::FrameMailbox;
use super::source::{FrameSource, SourceOpener, VideoInfo};

const EVENT_CAPACITY: usize = 64;

/// Notifications from the decode thread
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Total playback length in seconds, sent once after opening
    Duration(f64),
    /// Index of the frame just published
    Position(u64),
    Error(DisplayError),
}

/// State shared between the worker handle and its thread
#[derive(Default)]
struct Shared {
    state: Mutex<PlaybackState>,
    paused: AtomicBool,
    stop: AtomicBool,
    seek: Mutex<Option<u64>>,
    info: Mutex<Option<VideoInfo>>,
    error: Mutex<Option<DisplayError>>,
    position: AtomicU64,
}

impl Shared {
    fn state(&self) -> PlaybackState {
        self.state.lock().map(|s| *s).unwrap_or(PlaybackState::Error)
    }

    fn set_state(&self, state: PlaybackState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    fn take_seek(&self) -> Option<u64> {
        self.seek.lock().ok()?.take()
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn seek_pending(&self) -> bool {
        self.seek.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

/// Sends the exit notice when the decode thread ends, even on panic
struct ExitSignal(SyncSender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

pub struct DecodeWorker {
    opener: Arc<dyn SourceOpener>,
    shared: Arc<Shared>,
    mailbox: FrameMailbox,
    events: Option<Receiver<WorkerEvent>>,
    thread: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
    stop_timeout: Duration,
}

impl DecodeWorker {
    pub fn new(opener: Arc<dyn SourceOpener>, stop_timeout: Duration) -> Self {
        Self {
            opener,
            shared: Arc::new(Shared::default()),
            mailbox: FrameMailbox::new(),
            events: None,
            thread: None,
            exited: None,
            stop_timeout,
        }
    }

    /// Start decoding `path` on a new thread.
    ///
    /// Only valid while `Stopped`; the file is opened on the decode thread.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Stopped || self.thread.is_some() {
            anyhow::bail!("Cannot load {} while {:?}", path.display(), state);
        }

        // A previous (possibly detached) thread keeps its own shared state
        // and mailbox, so nothing it still produces can reach this playback.
        self.shared = Arc::new(Shared::default());
        self.mailbox = FrameMailbox::new();
        self.shared.set_state(PlaybackState::Loading);

        let (events_tx, events_rx) = mpsc::sync_channel(EVENT_CAPACITY);
        let (exit_tx, exit_rx) = mpsc::sync_channel(1);

        let opener = Arc::clone(&self.opener);
        let shared = Arc::clone(&self.shared);
        let mailbox = self.mailbox.clone();
        let path_buf = path.to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let handle = std::thread::Builder::new()
            .name(format!("decode:{}", name))
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                decode_loop(opener, path_buf, shared, mailbox, events_tx);
            })
            .context("Failed to spawn decode thread");

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(PlaybackState::Error);
                return Err(e);
            }
        };

        log::debug!("Decode worker loading {}", path.display());
        self.thread = Some(handle);
        self.events = Some(events_rx);
        self.exited = Some(exit_rx);
        Ok(())
    }

    pub fn play(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            self.shared.paused.store(false, Ordering::Release);
            if *state == PlaybackState::Paused {
                *state = PlaybackState::Playing;
            }
        }
        self.wake();
    }

    pub fn pause(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            if matches!(*state, PlaybackState::Loading | PlaybackState::Playing) {
                self.shared.paused.store(true, Ordering::Release);
            }
            if *state == PlaybackState::Playing {
                *state = PlaybackState::Paused;
            }
        }
    }

    /// Queue a reposition; rejected when the index is past the known end
    pub fn seek(&self, index: u64) -> bool {
        if let Some(info) = self.info()
            && index >= info.total_frames
        {
            return false;
        }
        if matches!(
            self.state(),
            PlaybackState::Stopped | PlaybackState::Error
        ) {
            return false;
        }

        if let Ok(mut seek) = self.shared.seek.lock() {
            *seek = Some(index);
        }
        self.wake();
        true
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn info(&self) -> Option<VideoInfo> {
        self.shared.info.lock().ok()?.clone()
    }

    /// The failure that moved the worker into `Error`
    pub fn error(&self) -> Option<DisplayError> {
        self.shared.error.lock().ok()?.clone()
    }

    /// Index of the last published frame
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Relaxed)
    }

    pub fn mailbox(&self) -> &FrameMailbox {
        &self.mailbox
    }

    /// Drain every event queued since the last call
    pub fn poll_events(&self) -> Vec<WorkerEvent> {
        self.events
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    /// Ask the thread to end without waiting for it
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.wake();
    }

    /// Stop the thread, waiting at most the stop timeout.
    ///
    /// Returns `false` when the thread had to be detached.
    pub fn stop(&mut self) -> bool {
        self.request_stop();

        let joined = match self.thread.take() {
            None => true,
            Some(handle) => {
                let exited = match self.exited.take() {
                    Some(rx) => !matches!(
                        rx.recv_timeout(self.stop_timeout),
                        Err(RecvTimeoutError::Timeout)
                    ),
                    None => true,
                };

                if exited {
                    if handle.join().is_err() {
                        log::warn!("Decode thread panicked");
                    }
                    true
                } else {
                    log::warn!(
                        "Decode thread did not stop within {:?}, detaching it",
                        self.stop_timeout
                    );
                    false
                }
            }
        };

        if self.state() != PlaybackState::Error {
            self.shared.set_state(PlaybackState::Stopped);
        }
        joined
    }

    fn wake(&self) {
        if let Some(handle) = &self.thread {
            handle.thread().unpark();
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn fail(shared: &Shared, events: &SyncSender<WorkerEvent>, error: DisplayError) {
    if shared.stopping() {
        log::debug!("Decode error after stop request ignored: {}", error);
        return;
    }
    log::warn!("Decode worker failed: {}", error);
    if let Ok(mut slot) = shared.error.lock() {
        *slot = Some(error.clone());
    }
    shared.set_state(PlaybackState::Error);
    let _ = events.try_send(WorkerEvent::Error(error));
}

fn decode_loop(
    opener: Arc<dyn SourceOpener>,
    path: PathBuf,
    shared: Arc<Shared>,
    mailbox: FrameMailbox,
    events: SyncSender<WorkerEvent>,
) {
    let mut source = match opener.open(&path) {
        Ok(source) => source,
        Err(e) => {
            fail(&shared, &events, e);
            return;
        }
    };

    let info = source.info().clone();
    if info.total_frames == 0 {
        fail(
            &shared,
            &events,
            DisplayError::UnreadableFile(format!("{} reports zero frames", path.display())),
        );
        return;
    }

    if let Ok(mut slot) = shared.info.lock() {
        *slot = Some(info.clone());
    }
    let _ = events.try_send(WorkerEvent::Duration(info.duration_secs));

    {
        let Ok(mut state) = shared.state.lock() else {
            return;
        };
        if shared.stopping() {
            return;
        }
        *state = if shared.paused.load(Ordering::Acquire) {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        };
    }

    log::info!(
        "Decoding {} via {} ({}x{} @ {:.2} fps, {} frames)",
        path.display(),
        opener.name(),
        info.width,
        info.height,
        info.frame_rate,
        info.total_frames
    );

    if let Err(e) = run_frames(source.as_mut(), &info, &shared, &mailbox, &events) {
        fail(&shared, &events, e);
    }

    log::debug!("Decode thread for {} exiting", path.display());
}

fn run_frames(
    source: &mut dyn FrameSource,
    info: &VideoInfo,
    shared: &Shared,
    mailbox: &FrameMailbox,
    events: &SyncSender<WorkerEvent>,
) -> Result<(), DisplayError> {
    let interval = info.frame_interval();
    let mut deadline = Instant::now();
    let mut just_rewound = false;

    while !shared.stopping() {
        if let Some(index) = shared.take_seek() {
            source
                .seek(index)
                .map_err(|e| DisplayError::DecodeError(format!("Seek to {} failed: {:#}", index, e)))?;
            shared.position.store(index, Ordering::Relaxed);
            just_rewound = false;
            log::debug!("Seeked to frame {}", index);
        }

        if !shared.paused.load(Ordering::Acquire) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    let index = frame.index;
                    just_rewound = false;
                    shared.position.store(index, Ordering::Relaxed);
                    mailbox.publish(frame);
                    match events.try_send(WorkerEvent::Position(index)) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Ok(None) => {
                    if just_rewound {
                        return Err(DisplayError::DecodeError(
                            "No decodable frame after rewinding".to_string(),
                        ));
                    }
                    log::trace!("End of stream, looping back to frame 0");
                    source
                        .seek(0)
                        .map_err(|e| DisplayError::DecodeError(format!("Rewind failed: {:#}", e)))?;
                    just_rewound = true;
                    continue;
                }
                Err(e) => return Err(DisplayError::DecodeError(format!("{:#}", e))),
            }
        }

        deadline += interval;
        let now = Instant::now();
        if deadline <= now {
            // Fell behind; resume pacing from here instead of bursting
            deadline = now;
            continue;
        }
        while !shared.stopping() && !shared.seek_pending() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::PatternOpener;

    const STARTUP: Duration = Duration::from_secs(2);

    fn worker(opener: &PatternOpener) -> DecodeWorker {
        DecodeWorker::new(Arc::new(opener.clone()), Duration::from_millis(500))
    }

    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn positions(events: &[WorkerEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Position(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reaches_playing_and_publishes() {
        let opener = PatternOpener::new(10, 30.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/a.mp4")).unwrap();

        assert!(wait_for(|| worker.mailbox().has_new_frame(), STARTUP));
        assert_eq!(worker.state(), PlaybackState::Playing);

        let events = worker.poll_events();
        let durations: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Duration(_)))
            .collect();
        assert_eq!(durations.len(), 1);

        assert!(worker.stop());
        assert_eq!(worker.state(), PlaybackState::Stopped);
        assert_eq!(opener.live_sources(), 0);
    }

    #[test]
    fn test_pacing_and_looping() {
        let opener = PatternOpener::new(10, 10.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/ten.mp4")).unwrap();
        assert!(wait_for(|| worker.state() == PlaybackState::Playing, STARTUP));

        let start = worker.mailbox().frames_published();
        std::thread::sleep(Duration::from_millis(1500));
        let published = worker.mailbox().frames_published() - start;
        worker.stop();

        assert!(
            (12..=18).contains(&published),
            "published {} frames in 1.5s",
            published
        );

        let indices = positions(&worker.poll_events());
        assert!(indices.windows(2).any(|w| w[0] == 9 && w[1] == 0), "no wrap in {:?}", indices);
    }

    #[test]
    fn test_loop_order_has_no_gaps() {
        let opener = PatternOpener::new(5, 200.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/five.mp4")).unwrap();

        let mut indices = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(300) {
            indices.extend(positions(&worker.poll_events()));
            std::thread::sleep(Duration::from_millis(10));
        }
        worker.stop();
        indices.extend(positions(&worker.poll_events()));

        assert!(indices.len() > 10);
        assert_eq!(indices[0], 0);
        for pair in indices.windows(2) {
            assert_eq!(pair[1], (pair[0] + 1) % 5, "sequence {:?}", indices);
        }
    }

    #[test]
    fn test_open_failure_is_error() {
        let opener = PatternOpener::new(10, 30.0).failing_open();
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/broken.mp4")).unwrap();

        assert!(wait_for(|| worker.state() == PlaybackState::Error, STARTUP));
        let events = worker.poll_events();
        assert!(matches!(
            events.as_slice(),
            [WorkerEvent::Error(DisplayError::UnreadableFile(_))]
        ));
        assert!(matches!(worker.error(), Some(DisplayError::UnreadableFile(_))));

        worker.stop();
        assert_eq!(worker.state(), PlaybackState::Error);
        assert!(worker.load(Path::new("/clips/broken.mp4")).is_err());
    }

    #[test]
    fn test_zero_frames_is_error() {
        let opener = PatternOpener::new(0, 30.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/empty.mp4")).unwrap();

        assert!(wait_for(|| worker.state() == PlaybackState::Error, STARTUP));
        assert!(!worker.mailbox().has_new_frame());
        worker.stop();
        assert_eq!(opener.live_sources(), 0);
    }

    #[test]
    fn test_decode_error_releases_source() {
        let opener = PatternOpener::new(10, 100.0).failing_at(3);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/corrupt.mp4")).unwrap();

        assert!(wait_for(|| worker.state() == PlaybackState::Error, STARTUP));
        assert!(wait_for(|| opener.live_sources() == 0, STARTUP));

        let events = worker.poll_events();
        assert_eq!(positions(&events), vec![0, 1, 2]);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Error(DisplayError::DecodeError(_)))
        ));
    }

    #[test]
    fn test_pause_and_play() {
        let opener = PatternOpener::new(100, 100.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/long.mp4")).unwrap();
        assert!(wait_for(|| worker.state() == PlaybackState::Playing, STARTUP));

        worker.pause();
        assert_eq!(worker.state(), PlaybackState::Paused);
        std::thread::sleep(Duration::from_millis(50));
        let frozen = worker.mailbox().frames_published();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(worker.mailbox().frames_published(), frozen);

        worker.play();
        assert_eq!(worker.state(), PlaybackState::Playing);
        assert!(wait_for(
            || worker.mailbox().frames_published() > frozen,
            STARTUP
        ));
        worker.stop();
    }

    #[test]
    fn test_pause_while_loading() {
        let opener = PatternOpener::new(10, 30.0).with_open_delay(Duration::from_millis(100));
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/slow.mp4")).unwrap();
        assert_eq!(worker.state(), PlaybackState::Loading);

        worker.pause();
        assert!(wait_for(|| worker.state() == PlaybackState::Paused, STARTUP));
        assert_eq!(worker.mailbox().frames_published(), 0);
        worker.stop();
    }

    #[test]
    fn test_seek() {
        let opener = PatternOpener::new(20, 50.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/seek.mp4")).unwrap();
        assert!(wait_for(|| worker.state() == PlaybackState::Playing, STARTUP));

        assert!(!worker.seek(20));
        worker.pause();
        std::thread::sleep(Duration::from_millis(50));
        worker.poll_events();

        assert!(worker.seek(7));
        worker.play();
        let mut seen = Vec::new();
        assert!(wait_for(
            || {
                seen.extend(positions(&worker.poll_events()));
                !seen.is_empty()
            },
            STARTUP
        ));
        assert_eq!(seen[0], 7);
        worker.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let opener = PatternOpener::new(10, 30.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/a.mp4")).unwrap();

        assert!(worker.stop());
        assert!(worker.stop());
        assert_eq!(worker.state(), PlaybackState::Stopped);
        assert_eq!(opener.live_sources(), 0);
    }

    #[test]
    fn test_stop_detaches_stuck_thread() {
        let opener = PatternOpener::new(10, 30.0).with_frame_delay(Duration::from_millis(800));
        let mut worker = DecodeWorker::new(Arc::new(opener.clone()), Duration::from_millis(50));
        worker.load(Path::new("/clips/stuck.mp4")).unwrap();
        assert!(wait_for(|| worker.state() == PlaybackState::Playing, STARTUP));
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert!(!worker.stop());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(worker.state(), PlaybackState::Stopped);

        // The detached thread still releases its source once it wakes up
        assert!(wait_for(|| opener.live_sources() == 0, STARTUP));
    }

    #[test]
    fn test_load_twice_fails() {
        let opener = PatternOpener::new(10, 30.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/a.mp4")).unwrap();
        assert!(worker.load(Path::new("/clips/b.mp4")).is_err());
        worker.stop();
    }

    #[test]
    fn test_reload_after_stop() {
        let opener = PatternOpener::new(10, 30.0);
        let mut worker = worker(&opener);
        worker.load(Path::new("/clips/a.mp4")).unwrap();
        worker.stop();

        worker.load(Path::new("/clips/b.mp4")).unwrap();
        assert!(wait_for(|| worker.mailbox().has_new_frame(), STARTUP));
        worker.stop();
        assert_eq!(opener.opened_sources(), 2);
    }
}
