//! # Monitor Registry
//!
//! Owns one [`Monitor`] (capture + pipeline + session tracker) per camera
//! address and resolves loose queries to registered addresses.
//!
//! ## Resolution
//!
//! 1. Exact match on the address string.
//! 2. Otherwise the query is split on commas into keywords (trimmed, empty ones
//!    dropped) and the first registered address containing every keyword wins.
//!    Registration order breaks ties.
//! 3. Otherwise [`MonitorError::NotFound`].
//!
//! ## Lifecycle
//!
//! `register` starts the capture before the pipeline; `deregister` stops the
//! pipeline, then closes any open work session, then stops the capture. The
//! address list is insertion-ordered and only mutated by register/deregister.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use crate::{
    broadcast::StatusSnapshot,
    capture::{CameraAddress, CameraCapture, CaptureFactory, DefaultCaptureFactory},
    config::MonitorConfig,
    core::CapturedFrame,
    error::{MonitorError, MonitorResult},
    now_ms,
    processing::{Detector, NullDetector, PipelineStatus, ProcessingPipeline},
    session::{InMemorySessionStore, SessionStore, SessionTracker},
};

/// One registered camera.
pub struct Monitor {
    address: CameraAddress,
    capture: Arc<dyn CameraCapture>,
    pipeline: ProcessingPipeline,
    sessions: Option<Arc<SessionTracker>>,
}

impl Monitor {
    fn new(
        address: CameraAddress,
        capture: Arc<dyn CameraCapture>,
        detector: Arc<dyn Detector>,
        config: &MonitorConfig,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let pipeline = ProcessingPipeline::new(
            address.as_str(),
            Arc::clone(&capture),
            detector,
            config.pipeline.clone(),
            config.debounce,
        )
        .with_stop_timeout(config.capture.stop_timeout());

        let sessions = store.map(|store| {
            let tracker = Arc::new(SessionTracker::new(store));
            pipeline.add_observer(Arc::clone(&tracker) as _);
            tracker
        });

        Self {
            address,
            capture,
            pipeline,
            sessions,
        }
    }

    fn start(&self) -> MonitorResult<()> {
        self.capture.start(&self.address)?;
        if let Err(e) = self.pipeline.start() {
            self.capture.stop();
            return Err(e);
        }
        Ok(())
    }

    fn stop(&self) {
        self.pipeline.stop();
        if let Some(tracker) = &self.sessions {
            tracker.close(self.address.as_str());
        }
        self.capture.stop();
    }

    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    pub fn camera_address(&self) -> &CameraAddress {
        &self.address
    }

    pub fn capture(&self) -> &Arc<dyn CameraCapture> {
        &self.capture
    }

    pub fn pipeline(&self) -> &ProcessingPipeline {
        &self.pipeline
    }

    pub fn is_connected(&self) -> bool {
        self.capture.is_connected()
    }

    pub fn latest_frame(&self) -> Option<CapturedFrame> {
        self.capture.latest_frame()
    }

    /// The freshest frame re-encoded as JPEG, if one has arrived.
    pub fn latest_jpeg(&self, quality: u8) -> MonitorResult<Option<Vec<u8>>> {
        self.latest_frame()
            .map(|captured| captured.frame.to_jpeg(quality))
            .transpose()
    }

    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.pipeline.set_detection_enabled(enabled);
    }

    pub fn session_tracker(&self) -> Option<&SessionTracker> {
        self.sessions.as_deref()
    }

    /// Set when the capture gave up and needs a restart.
    pub fn terminal_error(&self) -> Option<MonitorError> {
        self.capture.terminal_error()
    }

    /// Point-in-time status for subscribers.
    pub fn snapshot(&self) -> StatusSnapshot {
        let status = self.status();
        let (work_seconds_today, session_id) = match &self.sessions {
            Some(tracker) => (
                tracker.duration_today(self.address()),
                tracker.current_session(),
            ),
            None => (None, None),
        };

        StatusSnapshot {
            address: self.address().to_string(),
            timestamp_ms: now_ms(),
            connected: self.is_connected(),
            person: status.person.stable,
            cup: status.cup.stable,
            motion: status.motion.stable,
            detection_enabled: status.detection_enabled,
            last_frame_at_ms: self.latest_frame().map(|f| f.captured_at_ms),
            work_seconds_today,
            session_id,
            terminal_error: self.terminal_error().map(|e| e.to_string()),
            stats: status.stats,
        }
    }
}

/// Builder for [`MonitorRegistry`].
pub struct MonitorRegistryBuilder {
    config: MonitorConfig,
    detector: Option<Arc<dyn Detector>>,
    capture_factory: Option<Arc<dyn CaptureFactory>>,
    session_store: Option<Arc<dyn SessionStore>>,
    sessions_enabled: bool,
}

impl MonitorRegistryBuilder {
    fn new() -> Self {
        Self {
            config: MonitorConfig::default(),
            detector: None,
            capture_factory: None,
            session_store: None,
            sessions_enabled: true,
        }
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn capture_factory(mut self, factory: Arc<dyn CaptureFactory>) -> Self {
        self.capture_factory = Some(factory);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self.sessions_enabled = true;
        self
    }

    /// Skip work-session tracking entirely.
    pub fn without_sessions(mut self) -> Self {
        self.session_store = None;
        self.sessions_enabled = false;
        self
    }

    pub fn build(self) -> MonitorRegistry {
        let capture_factory = self.capture_factory.unwrap_or_else(|| {
            Arc::new(DefaultCaptureFactory::new(self.config.capture.clone()))
        });
        let session_store = if self.sessions_enabled {
            Some(
                self.session_store
                    .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            )
        } else {
            None
        };

        MonitorRegistry {
            monitors: RwLock::new(Vec::new()),
            capture_factory,
            detector: self.detector.unwrap_or_else(|| Arc::new(NullDetector)),
            session_store,
            config: self.config,
        }
    }
}

/// Address → monitor map with fuzzy lookup.
pub struct MonitorRegistry {
    monitors: RwLock<Vec<Arc<Monitor>>>,
    capture_factory: Arc<dyn CaptureFactory>,
    detector: Arc<dyn Detector>,
    session_store: Option<Arc<dyn SessionStore>>,
    config: MonitorConfig,
}

impl MonitorRegistry {
    pub fn builder() -> MonitorRegistryBuilder {
        MonitorRegistryBuilder::new()
    }

    pub fn new(config: MonitorConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Create and start a monitor for `address`; returns the existing one if
    /// the address is already registered.
    pub fn register(&self, address: &str) -> MonitorResult<Arc<Monitor>> {
        let parsed = CameraAddress::parse(address)?;
        if let Some(existing) = self.get(parsed.as_str()) {
            return Ok(existing);
        }

        let mut monitors = self.write();
        // Another caller may have registered it between the two locks.
        if let Some(existing) = monitors.iter().find(|m| m.address() == parsed.as_str()) {
            return Ok(Arc::clone(existing));
        }

        let capture = self.capture_factory.create(&parsed);
        let monitor = Arc::new(Monitor::new(
            parsed,
            capture,
            Arc::clone(&self.detector),
            &self.config,
            self.session_store.clone(),
        ));
        monitor.start()?;
        info!(address = monitor.address(), kind = %monitor.capture.kind(), "monitor registered");
        monitors.push(Arc::clone(&monitor));
        Ok(monitor)
    }

    /// Stop and remove the monitor for `address`. Returns whether it existed.
    pub fn deregister(&self, address: &str) -> bool {
        let removed = {
            let mut monitors = self.write();
            monitors
                .iter()
                .position(|m| m.address() == address)
                .map(|idx| monitors.remove(idx))
        };
        match removed {
            Some(monitor) => {
                monitor.stop();
                info!(address, "monitor deregistered");
                true
            }
            None => {
                warn!(address, "deregister of unknown monitor");
                false
            }
        }
    }

    /// Exact address lookup.
    pub fn get(&self, address: &str) -> Option<Arc<Monitor>> {
        self.read()
            .iter()
            .find(|m| m.address() == address)
            .map(Arc::clone)
    }

    /// Exact match first, then all-keywords substring match.
    pub fn resolve(&self, query: &str) -> MonitorResult<Arc<Monitor>> {
        let monitors = self.read();
        if let Some(exact) = monitors.iter().find(|m| m.address() == query) {
            return Ok(Arc::clone(exact));
        }

        let keywords: Vec<&str> = query
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(MonitorError::not_found(query));
        }

        monitors
            .iter()
            .find(|m| keywords.iter().all(|k| m.address().contains(k)))
            .map(Arc::clone)
            .ok_or_else(|| MonitorError::not_found(query))
    }

    /// Registered addresses in registration order.
    pub fn addresses(&self) -> Vec<String> {
        self.read().iter().map(|m| m.address().to_string()).collect()
    }

    pub fn monitors(&self) -> Vec<Arc<Monitor>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Deregister every monitor, newest first.
    pub fn stop_all(&self) {
        let drained: Vec<Arc<Monitor>> = std::mem::take(&mut *self.write());
        for monitor in drained.into_iter().rev() {
            monitor.stop();
            info!(address = monitor.address(), "monitor deregistered");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Monitor>>> {
        self.monitors.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Monitor>>> {
        self.monitors.write().unwrap_or_else(|p| p.into_inner())
    }
}
