//! Single-slot frame hand-off between a decode thread and the display loop
//!
//! The producer overwrites whatever is in the slot; the consumer takes the
//! newest frame. Frames overwritten before being taken are counted as
//! dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::source::Frame;

/// Cloneable handle to one shared slot
#[derive(Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<Mutex<Option<Frame>>>,

    /// Set by the producer, cleared by the consumer
    new_frame_available: Arc<AtomicBool>,

    frames_published: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing any frame not yet taken
    pub fn publish(&self, frame: Frame) {
        let Ok(mut slot) = self.slot.lock() else {
            return;
        };

        if slot.is_some() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("Frame {} replaced an unconsumed frame", frame.index);
        }

        *slot = Some(frame);
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.new_frame_available.store(true, Ordering::Release);
    }

    /// Take the newest frame, if one arrived since the last take
    pub fn take(&self) -> Option<Frame> {
        if !self.new_frame_available.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.slot.lock().ok()?.take()
    }

    pub fn has_new_frame(&self) -> bool {
        self.new_frame_available.load(Ordering::Acquire)
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, read by playback statistics
    pub fn frames_dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::source::PixelFormat;

    fn frame(index: u64) -> Frame {
        Frame {
            data: vec![0; 4],
            width: 1,
            height: 1,
            format: PixelFormat::Bgra8,
            index,
        }
    }

    #[test]
    fn test_newest_frame_wins() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(0));
        mailbox.publish(frame(1));
        mailbox.publish(frame(2));

        assert_eq!(mailbox.take().map(|f| f.index), Some(2));
        assert_eq!(mailbox.frames_dropped(), 2);
        assert_eq!(mailbox.frames_published(), 3);
    }

    #[test]
    fn test_take_empties_slot() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.take().is_none());

        mailbox.publish(frame(7));
        assert!(mailbox.has_new_frame());
        assert!(mailbox.take().is_some());
        assert!(!mailbox.has_new_frame());
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn test_consumed_frames_are_not_dropped() {
        let mailbox = FrameMailbox::new();
        for i in 0..5 {
            mailbox.publish(frame(i));
            assert_eq!(mailbox.take().map(|f| f.index), Some(i));
        }
        assert_eq!(mailbox.frames_dropped(), 0);
    }

    #[test]
    fn test_clones_share_slot() {
        let producer = FrameMailbox::new();
        let consumer = producer.clone();
        std::thread::spawn(move || producer.publish(frame(3)))
            .join()
            .unwrap();
        assert_eq!(consumer.take().map(|f| f.index), Some(3));
    }
}
