//! # Motion Estimation
//!
//! Grayscale frame differencing between the two most recent analyzed frames.
//! A pixel counts as changed when its absolute intensity delta exceeds the
//! delta threshold; the tick reports motion when the changed fraction exceeds
//! the fraction threshold (0.4% by default).

use image::GrayImage;

use crate::{config::PipelineSettings, core::FrameHistory};

/// Fraction of pixels whose absolute delta is greater than `delta_threshold`.
///
/// `None` when the images differ in size or are empty.
pub fn changed_fraction(previous: &GrayImage, current: &GrayImage, delta_threshold: u8) -> Option<f64> {
    if previous.dimensions() != current.dimensions() {
        return None;
    }
    let total = previous.as_raw().len();
    if total == 0 {
        return None;
    }
    let changed = previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > delta_threshold)
        .count();
    Some(changed as f64 / total as f64)
}

#[derive(Debug, Clone, Copy)]
pub struct MotionEstimator {
    delta_threshold: u8,
    fraction_threshold: f64,
}

/// Result of one motion estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub fraction: f64,
    pub moving: bool,
}

impl MotionEstimator {
    pub fn new(delta_threshold: u8, fraction_threshold: f64) -> Self {
        Self {
            delta_threshold,
            fraction_threshold,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.motion_delta_threshold,
            settings.motion_fraction_threshold,
        )
    }

    /// Compare the two newest frames in `history`.
    ///
    /// Returns `None` with fewer than two frames or mismatched dimensions; the
    /// caller then leaves the motion signal untouched for this tick.
    pub fn estimate(&self, history: &FrameHistory) -> Option<MotionSample> {
        let (previous, latest) = history.last_pair()?;
        let fraction = changed_fraction(
            &previous.frame.to_luma(),
            &latest.frame.to_luma(),
            self.delta_threshold,
        )?;
        Some(MotionSample {
            fraction,
            moving: fraction > self.fraction_threshold,
        })
    }
}
