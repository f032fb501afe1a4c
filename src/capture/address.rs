//! # Camera Addresses
//!
//! Three URL shapes select the transport:
//!
//! | Address | Transport |
//! |---------|-----------|
//! | `ws://host/path`, `wss://host/path` | WebSocket push, one JPEG per binary message |
//! | `udpserver://bindIP:bindPort/sourceIP` | Chunked JPEG over UDP, filtered by sender IP |
//! | anything else (`http://...`, `0`) | Pull source: HTTP stream/snapshot or device index |
//!
//! The same string is the camera's registry key, so [`CameraAddress`] keeps the
//! text it was parsed from.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use crate::error::{MonitorError, MonitorResult};

const UDP_SCHEME: &str = "udpserver://";

/// Transport family selected by an address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    WebSocket,
    Udp,
    Pull,
}

impl CaptureKind {
    /// Pure scheme dispatch; never fails.
    pub fn for_url(url: &str) -> Self {
        let lower = url.trim().to_ascii_lowercase();
        if lower.starts_with("ws://") || lower.starts_with("wss://") {
            Self::WebSocket
        } else if lower.starts_with(UDP_SCHEME) {
            Self::Udp
        } else {
            Self::Pull
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Udp => "udp",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed camera address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraAddress {
    WebSocket(String),
    Udp {
        raw: String,
        bind: SocketAddr,
        source: IpAddr,
    },
    Pull(String),
}

impl CameraAddress {
    /// Parse an address string. Only the UDP form has structure to validate.
    pub fn parse(raw: &str) -> MonitorResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MonitorError::config("address", raw, "empty camera address"));
        }

        match CaptureKind::for_url(raw) {
            CaptureKind::WebSocket => Ok(Self::WebSocket(raw.to_string())),
            CaptureKind::Pull => Ok(Self::Pull(raw.to_string())),
            CaptureKind::Udp => {
                let rest = &raw[UDP_SCHEME.len()..];
                let (bind, source) = rest.split_once('/').ok_or_else(|| {
                    MonitorError::config("address", raw, "expected udpserver://bindIP:bindPort/sourceIP")
                })?;
                let bind: SocketAddr = bind.parse().map_err(|_| {
                    MonitorError::config("address", raw, format!("invalid bind address '{bind}'"))
                })?;
                let source: IpAddr = source.trim_end_matches('/').parse().map_err(|_| {
                    MonitorError::config("address", raw, format!("invalid source IP '{source}'"))
                })?;
                Ok(Self::Udp {
                    raw: raw.to_string(),
                    bind,
                    source,
                })
            }
        }
    }

    pub fn kind(&self) -> CaptureKind {
        match self {
            Self::WebSocket(_) => CaptureKind::WebSocket,
            Self::Udp { .. } => CaptureKind::Udp,
            Self::Pull(_) => CaptureKind::Pull,
        }
    }

    /// The original address text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::WebSocket(raw) | Self::Pull(raw) | Self::Udp { raw, .. } => raw,
        }
    }
}

impl fmt::Display for CameraAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
