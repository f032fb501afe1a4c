//! # Error Handling
//!
//! A single error type, [`MonitorError`], covers everything the monitor surfaces
//! to callers. Most failures never get this far: transport and decode errors are
//! absorbed inside the capture workers (logged and counted), and only
//! resolution failures and terminal capture failures are visible to callers.
//!
//! ## Error Classification
//!
//! Errors are classified using traits:
//!
//! - `Retryable`: errors a worker retries on its own schedule
//! - `HasSeverity`: log level the error should be reported at
//! - [`classify`]: helpers for transient/fatal decisions
//!
//! ## Usage
//!
//! ```rust
//! use camera_monitor::error::{MonitorError, Retryable};
//!
//! let error = MonitorError::network("connect", Some("ws://10.0.0.5/stream".into()));
//! assert!(error.is_retryable());
//!
//! let error = MonitorError::not_found("desk-7");
//! assert_eq!(error.category(), "not_found");
//! ```

use std::{error::Error as StdError, fmt};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected noise (malformed datagrams, stale frames)
    Debug,
    /// Absorbed failures worth a warning
    Warning,
    /// Errors surfaced to the caller
    Error,
    /// The component stopped and needs an external restart
    Fatal,
}

/// Base error type for the camera monitor
#[derive(Debug)]
pub enum MonitorError {
    /// Connect/read failures on a camera transport
    Network {
        operation: String,
        address: Option<String>,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    /// Malformed datagram, unregistered sender, or incomplete frame
    Protocol { reason: String },
    /// Image bytes that could not be decoded (or encoded)
    Decode { reason: String },
    /// Registry lookup matched nothing
    NotFound { query: String },
    /// A capture exhausted its consecutive-failure budget
    TerminalCapture { address: String, failures: u32 },
    /// Configuration or address validation errors
    Config {
        field: String,
        value: String,
        reason: String,
    },
    /// I/O errors (socket bind, config file)
    Io {
        operation: String,
        source: std::io::Error,
    },
    /// Invalid state transitions
    State {
        current_state: String,
        attempted_operation: String,
    },
    /// Failure reported by the external detector
    Detector { reason: String },
}

impl MonitorError {
    /// Create a transport error
    pub fn network(operation: impl Into<String>, address: Option<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            address,
            source: None,
        }
    }

    /// Create a transport error wrapping its cause
    pub fn network_with_source(
        operation: impl Into<String>,
        address: Option<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            operation: operation.into(),
            address,
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create a resolution error
    pub fn not_found(query: impl Into<String>) -> Self {
        Self::NotFound {
            query: query.into(),
        }
    }

    pub fn terminal_capture(address: impl Into<String>, failures: u32) -> Self {
        Self::TerminalCapture {
            address: address.into(),
            failures,
        }
    }

    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a state error
    pub fn state(current_state: impl Into<String>, attempted_operation: impl Into<String>) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
        }
    }

    pub fn detector(reason: impl Into<String>) -> Self {
        Self::Detector {
            reason: reason.into(),
        }
    }

    /// Short machine-readable category name
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Protocol { .. } => "protocol",
            Self::Decode { .. } => "decode",
            Self::NotFound { .. } => "not_found",
            Self::TerminalCapture { .. } => "terminal_capture",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
            Self::State { .. } => "state",
            Self::Detector { .. } => "detector",
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network {
                operation,
                address,
                source,
            } => {
                write!(f, "network error during {operation}")?;
                if let Some(address) = address {
                    write!(f, " ({address})")?;
                }
                if let Some(source) = source {
                    write!(f, ": {source}")?;
                }
                Ok(())
            }
            Self::Protocol { reason } => write!(f, "protocol violation: {reason}"),
            Self::Decode { reason } => write!(f, "image decode failed: {reason}"),
            Self::NotFound { query } => write!(f, "no monitor matches '{query}'"),
            Self::TerminalCapture { address, failures } => write!(
                f,
                "capture for {address} stopped after {failures} consecutive failures"
            ),
            Self::Config {
                field,
                value,
                reason,
            } => write!(f, "invalid {field} '{value}': {reason}"),
            Self::Io { operation, source } => write!(f, "I/O error during {operation}: {source}"),
            Self::State {
                current_state,
                attempted_operation,
            } => write!(f, "cannot {attempted_operation} while {current_state}"),
            Self::Detector { reason } => write!(f, "detector failed: {reason}"),
        }
    }
}

impl StdError for MonitorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Network {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors a worker may retry on its own schedule.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for MonitorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Io { .. } | Self::Detector { .. })
    }
}

/// Severity an error should be logged at.
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for MonitorError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Protocol { .. } => ErrorSeverity::Debug,
            Self::Network { .. } | Self::Decode { .. } | Self::Detector { .. } => {
                ErrorSeverity::Warning
            }
            Self::TerminalCapture { .. } => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Classification helpers
pub mod classify {
    use super::*;

    /// Failures that are expected to clear up without intervention
    pub fn is_transient(error: &MonitorError) -> bool {
        matches!(
            error,
            MonitorError::Network { .. }
                | MonitorError::Protocol { .. }
                | MonitorError::Decode { .. }
                | MonitorError::Detector { .. }
        )
    }

    /// Failures that need an owner to step in (restart, fix configuration)
    pub fn is_fatal(error: &MonitorError) -> bool {
        matches!(
            error,
            MonitorError::TerminalCapture { .. } | MonitorError::Config { .. }
        )
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(error: serde_json::Error) -> Self {
        Self::config("json", "<document>", error.to_string())
    }
}

impl From<image::ImageError> for MonitorError {
    fn from(error: image::ImageError) -> Self {
        Self::decode(error.to_string())
    }
}

/// Result alias used throughout the crate
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = MonitorError::config("analysis_hz", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert_eq!(
            error.to_string(),
            "invalid analysis_hz '0': must be greater than 0"
        );
    }

    #[test]
    fn test_network_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = MonitorError::network_with_source("connect", Some("ws://cam".into()), io);
        assert!(error.is_retryable());
        assert!(error.source().is_some());
        assert!(error.to_string().contains("ws://cam"));
    }

    #[test]
    fn test_error_classification() {
        let terminal = MonitorError::terminal_capture("0", 10);
        assert!(classify::is_fatal(&terminal));
        assert_eq!(terminal.severity(), ErrorSeverity::Fatal);

        let protocol = MonitorError::protocol("short datagram");
        assert!(classify::is_transient(&protocol));
        assert_eq!(protocol.severity(), ErrorSeverity::Debug);

        let missing = MonitorError::not_found("999");
        assert!(!classify::is_transient(&missing));
        assert!(!classify::is_fatal(&missing));
    }
}
