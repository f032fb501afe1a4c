//! # Camera Monitor Library
//!
//! Ingests live video from unreliable camera sources, keeps the freshest frame
//! per camera, and turns per-frame detector output into debounced presence
//! signals that many subscribers can watch.
//!
//! ## Architecture
//!
//! ```text
//! network bytes ─▶ CameraCapture ─▶ FrameSlot ─▶ ProcessingPipeline ─▶ PipelineStatus
//!                  (ws / udp / pull)            (5 Hz, detect, debounce)      │
//!                                                                             ▼
//!                              MonitorRegistry ─▶ Broadcaster ─▶ subscribers
//! ```
//!
//! The library is organized into several key modules:
//! - `capture`: the capture contract, address parsing, and the three transports
//! - `core`: frames, the single-frame slot, and the bounded frame history
//! - `processing`: debouncer, motion estimation, detector boundary, pipeline
//! - `registry`: one capture+pipeline pair per camera, exact and fuzzy lookup
//! - `broadcast`: periodic status fan-out to subscribers
//! - `session`: work-session accounting driven by the person signal
//! - `config`, `error`, `logging`: ambient plumbing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use camera_monitor::{MonitorRegistry, processing::NullDetector};
//!
//! # fn example() -> Result<(), camera_monitor::MonitorError> {
//! let registry = MonitorRegistry::builder()
//!     .detector(Arc::new(NullDetector))
//!     .build();
//!
//! registry.register("udpserver://0.0.0.0:9000/10.0.0.7")?;
//! let monitor = registry.resolve("9000,10.0.0.7")?;
//! println!("connected: {}", monitor.is_connected());
//!
//! registry.stop_all();
//! # Ok(())
//! # }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod processing;
pub mod registry;
pub mod session;

/// Re-export error types for convenience
pub use error::{ErrorSeverity, HasSeverity, MonitorError, MonitorResult, Retryable};

pub use broadcast::{Broadcaster, StatusSink, StatusSnapshot, SubscriberHub};
pub use capture::{CameraAddress, CameraCapture, CaptureKind};
pub use config::MonitorConfig;
pub use core::{CapturedFrame, Frame, FrameSlot};
pub use registry::{Monitor, MonitorRegistry};

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// Capture timestamps and staleness checks share this clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
