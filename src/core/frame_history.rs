//! # Frame History
//!
//! Fixed-capacity rolling window of analyzed frames. Pushing into a full
//! history drops the oldest entry, so memory stays bounded no matter how long a
//! pipeline runs.

use std::collections::VecDeque;

use super::frame::CapturedFrame;

#[derive(Debug)]
pub struct FrameHistory {
    frames: VecDeque<CapturedFrame>,
    capacity: usize,
}

impl FrameHistory {
    /// Create a history holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: CapturedFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// The two most recent frames as `(previous, latest)`.
    pub fn last_pair(&self) -> Option<(&CapturedFrame, &CapturedFrame)> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        Some((&self.frames[len - 2], &self.frames[len - 1]))
    }

    pub fn latest(&self) -> Option<&CapturedFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frame;
    use image::RgbImage;

    fn captured(at: u64) -> CapturedFrame {
        CapturedFrame {
            frame: Frame::new(RgbImage::new(1, 1)),
            captured_at_ms: at,
        }
    }

    #[test]
    fn keeps_only_capacity_frames() {
        let mut history = FrameHistory::new(30);
        for at in 0..100 {
            history.push(captured(at));
        }
        assert_eq!(history.len(), 30);
        assert_eq!(history.latest().unwrap().captured_at_ms, 99);

        let (previous, latest) = history.last_pair().unwrap();
        assert_eq!((previous.captured_at_ms, latest.captured_at_ms), (98, 99));
    }

    #[test]
    fn pair_needs_two_frames() {
        let mut history = FrameHistory::new(3);
        assert!(history.last_pair().is_none());
        history.push(captured(1));
        assert!(history.last_pair().is_none());
        history.push(captured(2));
        assert!(history.last_pair().is_some());
    }
}
