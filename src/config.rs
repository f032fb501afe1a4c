//! # Configuration Module
//!
//! Tunables for capture workers, analysis pipelines and the debouncer. Every
//! field has a default, so an empty JSON document (or no file at all) yields a
//! working configuration.
//!
//! ## Configuration Parameters
//!
//! | Section | Parameter | Default | Description |
//! |---------|-----------|---------|-------------|
//! | root | `broadcast_interval_ms` | 500 | Subscriber push period |
//! | `capture` | `ws_retry_ms` | 1000 | Wait before a WebSocket reconnect |
//! | `capture` | `ws_ping_interval_ms` | 1000 | Keepalive ping period on live WebSocket sessions |
//! | `capture` | `ws_idle_timeout_ms` | 3000 | Silence after which a WebSocket session counts as lost |
//! | `capture` | `pull_frame_interval_ms` | 33 | Pacing between pull reads (~30 fps) |
//! | `capture` | `pull_backoff_step_ms` | 500 | Backoff per consecutive failure |
//! | `capture` | `pull_backoff_cap_ms` | 5000 | Backoff ceiling |
//! | `capture` | `pull_max_failures` | 10 | Failures before a pull capture gives up |
//! | `capture` | `udp_max_in_flight` | 5 | Frames retained per UDP source |
//! | `pipeline` | `analysis_hz` | 5 | Analysis ticks per second |
//! | `pipeline` | `staleness_ms` | 1000 | Frames older than this are skipped |
//! | `pipeline` | `motion_fraction_threshold` | 0.004 | Changed-pixel fraction that counts as motion |
//! | `debounce` | `person_hold_ms` | 2000 | Hold time of the person signal |
//! | `debounce` | `cup_hold_ms` | 5000 | Hold time of the cup signal |
//! | `debounce` | `motion_hold_ms` | 10000 | Hold time of the motion signal |
//!
//! ## Examples
//!
//! ```rust
//! use camera_monitor::config::MonitorConfig;
//!
//! let config: MonitorConfig = serde_json::from_str(r#"{
//!     "cameras": ["udpserver://0.0.0.0:9000/10.0.0.7"],
//!     "pipeline": { "analysis_hz": 10 }
//! }"#).unwrap();
//!
//! assert_eq!(config.pipeline.analysis_hz, 10);
//! assert_eq!(config.debounce.person_hold_ms, 2000);
//! assert!(config.validate().is_ok());
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Top-level configuration for the monitor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Camera addresses registered at startup.
    pub cameras: Vec<String>,

    /// Period of the subscriber broadcaster in milliseconds.
    pub broadcast_interval_ms: u64,

    pub capture: CaptureSettings,
    pub pipeline: PipelineSettings,
    pub debounce: DebounceSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            broadcast_interval_ms: 500,
            capture: CaptureSettings::default(),
            pipeline: PipelineSettings::default(),
            debounce: DebounceSettings::default(),
        }
    }
}

/// Transport and retry policy shared by every capture variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Fixed wait after a WebSocket connect failure or connection loss.
    pub ws_retry_ms: u64,
    /// Keepalive ping period while a WebSocket session is up.
    pub ws_ping_interval_ms: u64,
    /// A session with no inbound message (frame or pong) for this long is dropped.
    pub ws_idle_timeout_ms: u64,
    /// Nominal pacing between pull-source reads.
    pub pull_frame_interval_ms: u64,
    /// Backoff grows by this much per consecutive pull failure...
    pub pull_backoff_step_ms: u64,
    /// ...up to this ceiling.
    pub pull_backoff_cap_ms: u64,
    /// Consecutive pull failures after which the worker terminates.
    pub pull_max_failures: u32,
    /// Connect/read timeout for HTTP pull sources.
    pub http_timeout_ms: u64,
    /// Frame indices retained per UDP source before eviction.
    pub udp_max_in_flight: usize,
    /// Receive timeout of UDP listener sockets; bounds stop latency.
    pub udp_recv_timeout_ms: u64,
    /// How long `stop()` waits for a worker before detaching it.
    pub stop_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ws_retry_ms: 1000,
            ws_ping_interval_ms: 1000,
            ws_idle_timeout_ms: 3000,
            pull_frame_interval_ms: 33,
            pull_backoff_step_ms: 500,
            pull_backoff_cap_ms: 5000,
            pull_max_failures: 10,
            http_timeout_ms: 5000,
            udp_max_in_flight: 5,
            udp_recv_timeout_ms: 50,
            stop_timeout_ms: 5000,
        }
    }
}

impl CaptureSettings {
    pub fn ws_retry(&self) -> Duration {
        Duration::from_millis(self.ws_retry_ms)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_millis(self.ws_ping_interval_ms)
    }

    pub fn ws_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_idle_timeout_ms)
    }

    pub fn pull_frame_interval(&self) -> Duration {
        Duration::from_millis(self.pull_frame_interval_ms)
    }

    /// Backoff after `failures` consecutive pull failures: `min(n * step, cap)`.
    pub fn pull_backoff(&self, failures: u32) -> Duration {
        let millis = self
            .pull_backoff_step_ms
            .saturating_mul(u64::from(failures))
            .min(self.pull_backoff_cap_ms);
        Duration::from_millis(millis)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn udp_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.udp_recv_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Analysis cadence and detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub analysis_hz: u32,
    pub staleness_ms: u64,
    /// Frames kept for motion estimation.
    pub history_len: usize,
    /// Per-pixel grayscale delta that counts as "changed".
    pub motion_delta_threshold: u8,
    /// Changed-pixel fraction above which a tick reports motion.
    pub motion_fraction_threshold: f64,
    /// Detector class name mapped to the person signal.
    pub person_class: String,
    /// Detector class name mapped to the cup signal.
    pub cup_class: String,
    /// Initial state of the detection toggle.
    pub detection_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            analysis_hz: 5,
            staleness_ms: 1000,
            history_len: 30,
            motion_delta_threshold: 25,
            motion_fraction_threshold: 0.004,
            person_class: "person".to_string(),
            cup_class: "cup".to_string(),
            detection_enabled: true,
        }
    }
}

impl PipelineSettings {
    /// Time between analysis ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.analysis_hz.max(1)))
    }
}

/// Hold times of the debounced signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSettings {
    pub person_hold_ms: u64,
    pub cup_hold_ms: u64,
    pub motion_hold_ms: u64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            person_hold_ms: 2000,
            cup_hold_ms: 5000,
            motion_hold_ms: 10000,
        }
    }
}

impl MonitorConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::io(format!("read {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&text)?;
        config
            .validate()
            .map_err(|reason| MonitorError::config("config", path.display().to_string(), reason))?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    ///
    /// # Validation Rules
    ///
    /// - rates, capacities and intervals that drive loops must be greater than 0
    /// - `motion_fraction_threshold` must lie in `0.0..=1.0`
    /// - the backoff cap must not be below one backoff step
    /// - detector class names must not be empty
    pub fn validate(&self) -> Result<(), String> {
        if self.broadcast_interval_ms == 0 {
            return Err("Broadcast interval must be greater than 0".to_string());
        }

        let capture = &self.capture;
        if capture.ws_ping_interval_ms == 0 || capture.ws_idle_timeout_ms == 0 {
            return Err("WebSocket ping interval and idle timeout must be greater than 0".to_string());
        }
        if capture.ws_idle_timeout_ms <= capture.ws_ping_interval_ms {
            return Err("WebSocket idle timeout must exceed the ping interval".to_string());
        }
        if capture.pull_frame_interval_ms == 0 {
            return Err("Pull frame interval must be greater than 0".to_string());
        }
        if capture.pull_max_failures == 0 {
            return Err("Pull failure budget must be greater than 0".to_string());
        }
        if capture.pull_backoff_cap_ms < capture.pull_backoff_step_ms {
            return Err("Pull backoff cap must be at least one backoff step".to_string());
        }
        if capture.udp_max_in_flight == 0 {
            return Err("UDP in-flight frame limit must be greater than 0".to_string());
        }
        if capture.udp_recv_timeout_ms == 0 {
            return Err("UDP receive timeout must be greater than 0".to_string());
        }

        let pipeline = &self.pipeline;
        if pipeline.analysis_hz == 0 || pipeline.analysis_hz > 1000 {
            return Err("Analysis rate must be between 1 and 1000 Hz".to_string());
        }
        if pipeline.history_len < 2 {
            return Err("Frame history must hold at least 2 frames".to_string());
        }
        if !(0.0..=1.0).contains(&pipeline.motion_fraction_threshold) {
            return Err("Motion fraction threshold must be between 0.0 and 1.0".to_string());
        }
        if pipeline.person_class.is_empty() || pipeline.cup_class.is_empty() {
            return Err("Detector class names must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert!(config.cameras.is_empty());
        assert_eq!(config.broadcast_interval_ms, 500);
        assert_eq!(config.capture.pull_max_failures, 10);
        assert_eq!(config.pipeline.analysis_hz, 5);
        assert_eq!(config.pipeline.tick_interval(), Duration::from_millis(200));
        assert_eq!(config.debounce.motion_hold_ms, 10000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_schedule() {
        let capture = CaptureSettings::default();
        assert_eq!(capture.pull_backoff(1), Duration::from_millis(500));
        assert_eq!(capture.pull_backoff(4), Duration::from_millis(2000));
        assert_eq!(capture.pull_backoff(10), Duration::from_millis(5000));
        assert_eq!(capture.pull_backoff(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();

        config.pipeline.analysis_hz = 0;
        assert!(config.validate().is_err());
        config.pipeline.analysis_hz = 5;

        config.capture.udp_max_in_flight = 0;
        assert!(config.validate().is_err());
        config.capture.udp_max_in_flight = 5;

        config.pipeline.motion_fraction_threshold = 1.5;
        assert!(config.validate().is_err());
        config.pipeline.motion_fraction_threshold = 0.004;

        config.capture.pull_backoff_cap_ms = 100;
        assert!(config.validate().is_err());
        config.capture.pull_backoff_cap_ms = 5000;

        config.capture.ws_idle_timeout_ms = 500;
        assert!(config.validate().is_err());
        config.capture.ws_idle_timeout_ms = 3000;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"debounce": {"cup_hold_ms": 7000}}"#).unwrap();
        assert_eq!(config.debounce.cup_hold_ms, 7000);
        assert_eq!(config.debounce.person_hold_ms, 2000);
        assert_eq!(config.capture.ws_retry_ms, 1000);
    }
}
