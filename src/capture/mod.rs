//! # Capture Module
//!
//! The [`CameraCapture`] contract and its three transports.
//!
//! ## Contract
//!
//! - `start` spawns exactly one owned worker; calling it again while a worker
//!   exists is a no-op, even when that worker has given up.
//! - `stop` is idempotent, signals the worker and waits a bounded time for it.
//! - `latest_frame` never touches the network; it copies out of the
//!   [`FrameSlot`](crate::core::FrameSlot) under a short lock.
//! - `is_connected` is true only while the worker runs and a transport session
//!   is live. "Running" survives reconnect attempts; "connected" does not.
//!
//! ## Variants
//!
//! - [`websocket::WebSocketCapture`]: client of a push endpoint, one JPEG per
//!   binary message, fixed-interval reconnect
//! - [`udp::UdpCapture`]: one sender IP on a shared, multiplexed UDP listener
//! - [`pull::PullCapture`]: blocking open/read sources with bounded backoff and
//!   a terminal failure budget

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

pub mod address;
pub mod pull;
pub mod udp;
pub mod websocket;
pub mod worker;

pub use address::{CameraAddress, CaptureKind};
pub use pull::{PullCapture, PullSource, PullSourceFactory};
pub use udp::{UdpCapture, UdpListener, UdpListenerPool, UdpStatsSnapshot};
pub use websocket::WebSocketCapture;
pub use worker::{StopSignal, Worker};

use crate::{
    config::CaptureSettings,
    core::{CapturedFrame, Frame, FrameSlot},
    error::{MonitorError, MonitorResult},
    now_ms,
};

/// Capability interface shared by every transport.
pub trait CameraCapture: Send + Sync {
    fn kind(&self) -> CaptureKind;

    /// Spawn the worker for `address`. No-op while a worker already exists.
    fn start(&self, address: &CameraAddress) -> MonitorResult<()>;

    /// Stop the worker and release transport resources. Idempotent.
    fn stop(&self);

    /// Copy of the most recently decoded frame, if any.
    fn latest_frame(&self) -> Option<CapturedFrame>;

    fn is_connected(&self) -> bool;

    /// Whether `start` has been called without a matching `stop`.
    fn is_running(&self) -> bool;

    /// Set once the worker has given up for good; cleared by `stop` + `start`.
    fn terminal_error(&self) -> Option<MonitorError> {
        None
    }
}

/// Frame slot plus connection flag written by a capture's worker.
#[derive(Debug, Default)]
pub struct CaptureState {
    slot: FrameSlot,
    connected: AtomicBool,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly decoded frame and mark the transport live.
    pub fn publish(&self, frame: Frame) {
        self.slot.store(frame, now_ms());
        self.connected.store(true, Ordering::Release);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<CapturedFrame> {
        self.slot.latest()
    }
}

/// Builds a capture for an address. Injected into the registry so tests can
/// substitute fake transports.
pub trait CaptureFactory: Send + Sync {
    fn create(&self, address: &CameraAddress) -> Arc<dyn CameraCapture>;
}

impl<F> CaptureFactory for F
where
    F: Fn(&CameraAddress) -> Arc<dyn CameraCapture> + Send + Sync,
{
    fn create(&self, address: &CameraAddress) -> Arc<dyn CameraCapture> {
        self(address)
    }
}

/// Scheme-dispatching factory used in production.
pub struct DefaultCaptureFactory {
    settings: CaptureSettings,
    udp_pool: Arc<UdpListenerPool>,
    pull_sources: Arc<dyn PullSourceFactory>,
}

impl DefaultCaptureFactory {
    pub fn new(settings: CaptureSettings) -> Self {
        let pull_sources = Arc::new(pull::DefaultPullSources::new(settings.http_timeout()));
        Self {
            settings,
            udp_pool: UdpListenerPool::global(),
            pull_sources,
        }
    }

    /// Use a private listener pool instead of the process-wide one.
    pub fn with_udp_pool(mut self, pool: Arc<UdpListenerPool>) -> Self {
        self.udp_pool = pool;
        self
    }

    pub fn with_pull_sources(mut self, sources: Arc<dyn PullSourceFactory>) -> Self {
        self.pull_sources = sources;
        self
    }
}

impl CaptureFactory for DefaultCaptureFactory {
    fn create(&self, address: &CameraAddress) -> Arc<dyn CameraCapture> {
        match address.kind() {
            CaptureKind::WebSocket => Arc::new(WebSocketCapture::new(self.settings.clone())),
            CaptureKind::Udp => Arc::new(UdpCapture::new(
                self.settings.clone(),
                Arc::clone(&self.udp_pool),
            )),
            CaptureKind::Pull => Arc::new(PullCapture::new(
                self.settings.clone(),
                Arc::clone(&self.pull_sources),
            )),
        }
    }
}

/// Create an unstarted capture for `address` using process-wide defaults.
pub fn create_capture(address: &CameraAddress, settings: &CaptureSettings) -> Arc<dyn CameraCapture> {
    DefaultCaptureFactory::new(settings.clone()).create(address)
}
