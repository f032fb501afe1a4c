//! # Processing Pipeline
//!
//! Per-camera analysis loop, decoupled from the camera's frame rate.
//!
//! ## Architecture
//!
//! ```text
//!  every 1/analysis_hz:
//!    capture.latest_frame()
//!      ├─ none ─────────────▶ wait for next tick
//!      ├─ older than 1000ms ─▶ drop (stale), wait
//!      └─ fresh ─▶ FrameHistory ─▶ detector ─▶ person/cup ─┐
//!                                └▶ frame diff ─▶ motion ──┴▶ DetectionDebouncer
//!                                                             │
//!                                       PipelineStatus ◀──────┤
//!                                       TransitionObserver ◀──┘
//! ```
//!
//! The per-tick logic lives in [`Analyzer`], which owns no threads and takes
//! the clock as an argument. [`ProcessingPipeline`] wraps it in a worker and
//! publishes its status through a lock that only the worker writes.
//!
//! Detector errors are logged, counted and read as "nothing detected" for that
//! tick; they never stop the loop. While detection is disabled the detector is
//! not called and the person/cup signals keep their state; motion continues.

use std::{
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    debounce::{DetectionDebouncer, Signal, SignalState, Transition},
    detector::{Detector, RawSignals},
    motion::MotionEstimator,
};
use crate::{
    capture::{CameraCapture, StopSignal, Worker},
    config::{DebounceSettings, PipelineSettings},
    core::{CapturedFrame, FrameHistory},
    error::MonitorResult,
    now_ms,
};

/// Receives debounced state changes. Called on the pipeline worker thread.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, address: &str, transition: &Transition);

    /// The pipeline stopped; no further transitions will arrive.
    fn on_stop(&self, _address: &str) {}
}

/// Absorbed-event counters of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub ticks: u64,
    pub analyzed: u64,
    pub empty: u64,
    pub stale_dropped: u64,
    pub detector_failures: u64,
}

/// Latest debounced state, as seen by readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub person: SignalState,
    pub cup: SignalState,
    pub motion: SignalState,
    pub detection_enabled: bool,
    pub last_analyzed_at_ms: Option<u64>,
    pub last_motion_fraction: Option<f64>,
    pub stats: PipelineStats,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoFrame,
    Stale { age_ms: u64 },
    Analyzed { transitions: Vec<Transition> },
}

/// Single-threaded per-tick analysis state.
pub struct Analyzer {
    settings: PipelineSettings,
    detector: Arc<dyn Detector>,
    debouncer: DetectionDebouncer,
    motion: MotionEstimator,
    history: FrameHistory,
    stats: PipelineStats,
    last_analyzed_at_ms: Option<u64>,
    last_motion_fraction: Option<f64>,
}

impl Analyzer {
    pub fn new(
        settings: PipelineSettings,
        debounce: DebounceSettings,
        detector: Arc<dyn Detector>,
    ) -> Self {
        Self {
            motion: MotionEstimator::from_settings(&settings),
            history: FrameHistory::new(settings.history_len),
            debouncer: DetectionDebouncer::new(debounce),
            settings,
            detector,
            stats: PipelineStats::default(),
            last_analyzed_at_ms: None,
            last_motion_fraction: None,
        }
    }

    /// Run one analysis tick against the frame the capture currently holds.
    pub fn tick(
        &mut self,
        frame: Option<CapturedFrame>,
        now_ms: u64,
        detection_enabled: bool,
    ) -> TickOutcome {
        self.stats.ticks += 1;

        let Some(captured) = frame else {
            self.stats.empty += 1;
            return TickOutcome::NoFrame;
        };
        let age_ms = captured.age_ms(now_ms);
        if age_ms > self.settings.staleness_ms {
            self.stats.stale_dropped += 1;
            return TickOutcome::Stale { age_ms };
        }

        self.history.push(captured);
        let mut transitions = Vec::new();

        if detection_enabled {
            let raw = self.detect();
            transitions.extend(self.debouncer.update(Signal::Person, raw.person, now_ms));
            transitions.extend(self.debouncer.update(Signal::Cup, raw.cup, now_ms));
        }

        if let Some(sample) = self.motion.estimate(&self.history) {
            self.last_motion_fraction = Some(sample.fraction);
            transitions.extend(self.debouncer.update(Signal::Motion, sample.moving, now_ms));
        }

        self.stats.analyzed += 1;
        self.last_analyzed_at_ms = Some(now_ms);
        TickOutcome::Analyzed { transitions }
    }

    fn detect(&mut self) -> RawSignals {
        let Some(latest) = self.history.latest() else {
            return RawSignals::default();
        };
        match self.detector.detect(&latest.frame) {
            Ok(detections) => RawSignals::from_detections(
                &detections,
                &self.settings.person_class,
                &self.settings.cup_class,
            ),
            Err(e) => {
                self.stats.detector_failures += 1;
                warn!(error = %e, "detector failed, treating tick as empty");
                RawSignals::default()
            }
        }
    }

    pub fn debouncer(&self) -> &DetectionDebouncer {
        &self.debouncer
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn status(&self, detection_enabled: bool) -> PipelineStatus {
        PipelineStatus {
            person: self.debouncer.state(Signal::Person),
            cup: self.debouncer.state(Signal::Cup),
            motion: self.debouncer.state(Signal::Motion),
            detection_enabled,
            last_analyzed_at_ms: self.last_analyzed_at_ms,
            last_motion_fraction: self.last_motion_fraction,
            stats: self.stats,
        }
    }
}

struct Shared {
    status: RwLock<PipelineStatus>,
    detection_enabled: AtomicBool,
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl Shared {
    fn observers(&self) -> Vec<Arc<dyn TransitionObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Analysis worker of one camera.
pub struct ProcessingPipeline {
    address: String,
    capture: Arc<dyn CameraCapture>,
    detector: Arc<dyn Detector>,
    settings: PipelineSettings,
    debounce: DebounceSettings,
    stop_timeout: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl ProcessingPipeline {
    pub fn new(
        address: impl Into<String>,
        capture: Arc<dyn CameraCapture>,
        detector: Arc<dyn Detector>,
        settings: PipelineSettings,
        debounce: DebounceSettings,
    ) -> Self {
        let detection_enabled = settings.detection_enabled;
        Self {
            address: address.into(),
            capture,
            detector,
            settings,
            debounce,
            stop_timeout: Duration::from_secs(5),
            shared: Arc::new(Shared {
                status: RwLock::new(PipelineStatus {
                    detection_enabled,
                    ..PipelineStatus::default()
                }),
                detection_enabled: AtomicBool::new(detection_enabled),
                observers: RwLock::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn add_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(observer);
    }

    /// Spawn the analysis worker. No-op while it is running.
    pub fn start(&self) -> MonitorResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return Ok(());
        }

        let mut analyzer = Analyzer::new(
            self.settings.clone(),
            self.debounce,
            Arc::clone(&self.detector),
        );
        let capture = Arc::clone(&self.capture);
        let shared = Arc::clone(&self.shared);
        let address = self.address.clone();
        let interval = self.settings.tick_interval();

        *worker = Some(Worker::spawn(format!("pipeline {address}"), move |stop| {
            run_worker(&address, &mut analyzer, capture.as_ref(), &shared, interval, &stop)
        })?);
        info!(address = %self.address, hz = self.settings.analysis_hz, "pipeline started");
        Ok(())
    }

    /// Stop the worker and tell observers no more transitions will come.
    pub fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(worker) = worker else {
            return;
        };
        worker.stop(self.stop_timeout);
        for observer in self.shared.observers() {
            observer.on_stop(&self.address);
        }
        info!(address = %self.address, "pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared
            .status
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.status().stats
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.shared.detection_enabled.store(enabled, Ordering::Release);
        info!(address = %self.address, enabled, "detection toggled");
    }

    pub fn detection_enabled(&self) -> bool {
        self.shared.detection_enabled.load(Ordering::Acquire)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

fn run_worker(
    address: &str,
    analyzer: &mut Analyzer,
    capture: &dyn CameraCapture,
    shared: &Shared,
    interval: Duration,
    stop: &StopSignal,
) {
    loop {
        let detection_enabled = shared.detection_enabled.load(Ordering::Acquire);
        let now = now_ms();
        let outcome = analyzer.tick(capture.latest_frame(), now, detection_enabled);

        *shared.status.write().unwrap_or_else(|p| p.into_inner()) =
            analyzer.status(detection_enabled);

        match outcome {
            TickOutcome::NoFrame => {}
            TickOutcome::Stale { age_ms } => debug!(address, age_ms, "skipping stale frame"),
            TickOutcome::Analyzed { transitions } => {
                if !transitions.is_empty() {
                    let observers = shared.observers();
                    for transition in &transitions {
                        info!(
                            address,
                            signal = transition.signal.as_str(),
                            to = ?transition.to,
                            "signal changed"
                        );
                        for observer in &observers {
                            observer.on_transition(address, transition);
                        }
                    }
                }
            }
        }

        if stop.sleep(interval) {
            break;
        }
    }
}
