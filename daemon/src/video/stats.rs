//! Playback statistics tracking

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks presented and dropped frames for one playback
pub struct VideoStats {
    frames_rendered: u64,

    /// Shared with the mailbox, which counts overwritten frames
    frames_dropped: Arc<AtomicU64>,

    source_fps: f64,

    last_stats_log: Instant,
}

impl VideoStats {
    pub fn new(source_fps: f64, frames_dropped: Arc<AtomicU64>) -> Self {
        Self {
            frames_rendered: 0,
            frames_dropped,
            source_fps,
            last_stats_log: Instant::now(),
        }
    }

    pub fn increment_rendered(&mut self) {
        self.frames_rendered += 1;
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Current drop rate as percentage
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.frames_dropped();
        let total = self.frames_rendered + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Log statistics if interval has elapsed
    pub fn maybe_log_stats(&mut self, label: &str, interval: Duration) {
        if self.last_stats_log.elapsed() < interval {
            return;
        }

        let dropped = self.frames_dropped();
        log::info!(
            "Video stats [{}] ({:.2} fps): {} rendered, {} dropped of {} total ({:.1}% drop rate)",
            label,
            self.source_fps,
            self.frames_rendered,
            dropped,
            self.frames_rendered + dropped,
            self.drop_rate()
        );

        self.last_stats_log = Instant::now();
    }
}
