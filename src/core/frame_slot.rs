//! # Frame Slot
//!
//! Holds the single latest frame of one capture. The owning capture worker is
//! the only writer; the pipeline (and snapshot readers) take clones. The lock is
//! held only for the pointer swap or the pointer clone, never across decode or
//! network I/O, so a reader can never observe a partially written frame.

use std::sync::{Mutex, MutexGuard};

use super::frame::{CapturedFrame, Frame};

#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<CapturedFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn store(&self, frame: Frame, captured_at_ms: u64) {
        *self.lock() = Some(CapturedFrame {
            frame,
            captured_at_ms,
        });
    }

    /// Copy out the latest frame, or `None` if nothing was written yet.
    pub fn latest(&self) -> Option<CapturedFrame> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<CapturedFrame>> {
        // A panicking writer cannot leave a half-written Option behind.
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::{sync::Arc, thread};

    #[test]
    fn empty_until_written() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.store(Frame::new(RgbImage::new(4, 4)), 42);
        let latest = slot.latest().unwrap();
        assert_eq!(latest.captured_at_ms, 42);

        slot.clear();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn readers_keep_their_copy_across_overwrites() {
        let slot = FrameSlot::new();
        slot.store(Frame::new(RgbImage::new(2, 2)), 1);
        let first = slot.latest().unwrap();

        slot.store(Frame::new(RgbImage::new(8, 8)), 2);
        assert_eq!(first.frame.width(), 2);
        assert_eq!(slot.latest().unwrap().frame.width(), 8);
    }

    #[test]
    fn concurrent_reads_see_whole_frames() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for i in 1..200u32 {
                    slot.store(Frame::new(RgbImage::new(i, i)), u64::from(i));
                }
            })
        };
        for _ in 0..200 {
            if let Some(latest) = slot.latest() {
                // Width and timestamp were written together.
                assert_eq!(u64::from(latest.frame.width()), latest.captured_at_ms);
            }
        }
        writer.join().unwrap();
    }
}
