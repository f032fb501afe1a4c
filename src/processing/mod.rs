//! # Processing Module
//!
//! Everything between a capture's frame slot and a camera's published state:
//! the analysis pipeline, the debouncer it feeds, motion estimation, and the
//! boundary to the external object detector.

pub mod debounce;
pub mod detector;
pub mod motion;
pub mod pipeline;

pub use debounce::{DetectionDebouncer, Presence, Signal, SignalState, Transition};
pub use detector::{BoundingBox, Detection, Detector, NullDetector, RawSignals};
pub use motion::{MotionEstimator, changed_fraction};
pub use pipeline::{
    Analyzer, PipelineStats, PipelineStatus, ProcessingPipeline, TickOutcome, TransitionObserver,
};
