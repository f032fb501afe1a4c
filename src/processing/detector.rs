//! # Detector Boundary
//!
//! Object detection is an external collaborator: a synchronous function from a
//! frame to a list of labelled boxes that may fail. The pipeline only needs two
//! booleans out of it, chosen by class name.

use serde::Serialize;

use crate::core::Frame;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }
}

/// External object detector.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

/// Detector that never finds anything. Useful when only motion matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// Raw per-tick booleans derived from one detector result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSignals {
    pub person: bool,
    pub cup: bool,
}

impl RawSignals {
    pub fn from_detections(detections: &[Detection], person_class: &str, cup_class: &str) -> Self {
        let has = |class: &str| detections.iter().any(|d| d.class_name == class);
        Self {
            person: has(person_class),
            cup: has(cup_class),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }
    }

    #[test]
    fn maps_class_names_to_signals() {
        let detections = vec![
            Detection::new("person", 0.91, bbox()),
            Detection::new("chair", 0.55, bbox()),
        ];
        assert_eq!(
            RawSignals::from_detections(&detections, "person", "cup"),
            RawSignals {
                person: true,
                cup: false
            }
        );
        assert_eq!(
            RawSignals::from_detections(&[], "person", "cup"),
            RawSignals::default()
        );
    }
}
