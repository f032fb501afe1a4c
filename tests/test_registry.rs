//! Registry lifecycle, resolution and monitor state with fake captures.

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::Duration,
};

use camera_monitor::{
    MonitorConfig, MonitorError, MonitorRegistry,
    capture::CaptureFactory,
    processing::{Detector, Transition, TransitionObserver},
};
use common::{EventLog, FakeCaptures, FakeDetector, test_frames, wait_until};

fn fast_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.pipeline.analysis_hz = 50;
    config.capture.stop_timeout_ms = 2000;
    config.debounce.person_hold_ms = 100;
    config
}

fn registry_with(captures: &Arc<FakeCaptures>, detector: &Arc<FakeDetector>) -> MonitorRegistry {
    MonitorRegistry::builder()
        .config(fast_config())
        .capture_factory(Arc::clone(captures) as Arc<dyn CaptureFactory>)
        .detector(Arc::clone(detector) as Arc<dyn Detector>)
        .build()
}

struct StopRecorder {
    events: EventLog,
}

impl TransitionObserver for StopRecorder {
    fn on_transition(&self, _address: &str, _transition: &Transition) {}

    fn on_stop(&self, _address: &str) {
        self.events.lock().unwrap().push("pipeline stopped");
    }
}

#[test]
fn test_register_is_idempotent() {
    let captures = FakeCaptures::new();
    let registry = registry_with(&captures, &FakeDetector::new());

    let first = registry.register("ws://10.0.0.5:81/stream").unwrap();
    let second = registry.register("ws://10.0.0.5:81/stream").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(captures.created.load(Ordering::SeqCst), 1);
    assert_eq!(
        captures
            .get("ws://10.0.0.5:81/stream")
            .start_calls
            .load(Ordering::SeqCst),
        1
    );
    assert_eq!(registry.len(), 1);
    registry.stop_all();
}

#[test]
fn test_resolve_exact_then_keywords() {
    let registry = registry_with(&FakeCaptures::new(), &FakeDetector::new());
    for address in [
        "udpserver://0.0.0.0:9000/192.168.1.100",
        "udpserver://0.0.0.0:9000/192.168.100.102",
        "udpserver://0.0.0.0:9102/192.168.1.100",
        "http://10.0.0.9/mjpeg",
    ] {
        registry.register(address).unwrap();
    }

    let exact = registry.resolve("http://10.0.0.9/mjpeg").unwrap();
    assert_eq!(exact.address(), "http://10.0.0.9/mjpeg");

    // Both keywords, any order; first registered wins among matches.
    assert_eq!(
        registry.resolve("100,102").unwrap().address(),
        "udpserver://0.0.0.0:9000/192.168.100.102"
    );
    assert_eq!(
        registry.resolve(" 102 , 100 ").unwrap().address(),
        "udpserver://0.0.0.0:9000/192.168.100.102"
    );
    assert_eq!(
        registry.resolve("9102").unwrap().address(),
        "udpserver://0.0.0.0:9102/192.168.1.100"
    );

    assert!(matches!(
        registry.resolve("999"),
        Err(MonitorError::NotFound { .. })
    ));
    assert!(matches!(
        registry.resolve(" , "),
        Err(MonitorError::NotFound { .. })
    ));

    assert_eq!(
        registry.addresses(),
        vec![
            "udpserver://0.0.0.0:9000/192.168.1.100",
            "udpserver://0.0.0.0:9000/192.168.100.102",
            "udpserver://0.0.0.0:9102/192.168.1.100",
            "http://10.0.0.9/mjpeg",
        ]
    );
    registry.stop_all();
    assert!(registry.is_empty());
}

#[test]
fn test_invalid_address_is_rejected() {
    let captures = FakeCaptures::new();
    let registry = registry_with(&captures, &FakeDetector::new());
    assert!(matches!(
        registry.register("udpserver://0.0.0.0:9000/not-an-ip"),
        Err(MonitorError::Config { .. })
    ));
    assert_eq!(captures.created.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_deregister_stops_pipeline_and_capture() {
    let captures = FakeCaptures::new();
    let registry = registry_with(&captures, &FakeDetector::new());
    let monitor = registry.register("http://cam-a/stream").unwrap();
    assert!(monitor.pipeline().is_running());
    monitor.pipeline().add_observer(Arc::new(StopRecorder {
        events: Arc::clone(&captures.events),
    }));

    assert!(registry.deregister("http://cam-a/stream"));
    assert!(!monitor.pipeline().is_running());
    let capture = captures.get("http://cam-a/stream");
    assert_eq!(capture.stop_calls.load(Ordering::SeqCst), 1);
    assert!(!monitor.is_connected());
    // The pipeline must be down before its frame source goes away.
    assert_eq!(
        *captures.events.lock().unwrap(),
        vec!["pipeline stopped", "capture stopped"]
    );

    assert!(!registry.deregister("http://cam-a/stream"));
    assert!(registry.resolve("cam-a").is_err());
}

#[test]
fn test_person_presence_drives_work_session() {
    let captures = FakeCaptures::new();
    let detector = FakeDetector::new();
    let registry = registry_with(&captures, &detector);
    let monitor = registry.register("http://desk-7/stream").unwrap();
    let capture = captures.get("http://desk-7/stream");

    detector.person.store(true, Ordering::SeqCst);
    let feeding = {
        let capture = Arc::clone(&capture);
        thread::spawn(move || {
            for _ in 0..150 {
                capture.push(test_frames::solid(32, 24, 90));
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    assert!(wait_until(Duration::from_secs(3), || monitor.status().person.stable));
    let tracker = monitor.session_tracker().expect("sessions enabled by default");
    assert!(wait_until(Duration::from_secs(1), || tracker
        .current_session()
        .is_some()));

    let snapshot = monitor.snapshot();
    assert!(snapshot.person);
    assert!(snapshot.connected);
    assert!(snapshot.session_id.is_some());
    assert!(snapshot.last_frame_at_ms.is_some());

    let jpeg = monitor.latest_jpeg(80).unwrap().expect("frame available");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    feeding.join().unwrap();
    registry.stop_all();
    // Stopping the monitor closes the open session.
    assert_eq!(tracker.current_session(), None);
}

#[test]
fn test_stale_frames_are_skipped() {
    let captures = FakeCaptures::new();
    let detector = FakeDetector::new();
    let registry = registry_with(&captures, &detector);
    let monitor = registry.register("http://stale/stream").unwrap();

    captures
        .get("http://stale/stream")
        .push_at(test_frames::solid(8, 8, 0), camera_monitor::now_ms() - 5_000);

    assert!(wait_until(Duration::from_secs(2), || monitor
        .status()
        .stats
        .stale_dropped
        >= 3));
    assert_eq!(monitor.status().stats.analyzed, 0);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    registry.stop_all();
}

#[test]
fn test_detection_toggle() {
    let captures = FakeCaptures::new();
    let detector = FakeDetector::new();
    let registry = registry_with(&captures, &detector);
    let monitor = registry.register("http://toggle/stream").unwrap();
    let capture = captures.get("http://toggle/stream");

    monitor.set_detection_enabled(false);
    assert!(wait_until(Duration::from_secs(1), || !monitor
        .status()
        .detection_enabled));

    let calls_before = detector.calls.load(Ordering::SeqCst);
    for _ in 0..10 {
        capture.push(test_frames::solid(8, 8, 0));
        thread::sleep(Duration::from_millis(20));
    }
    assert!(monitor.status().stats.analyzed > 0);
    assert_eq!(detector.calls.load(Ordering::SeqCst), calls_before);

    monitor.set_detection_enabled(true);
    assert!(wait_until(Duration::from_secs(2), || {
        capture.push(test_frames::solid(8, 8, 0));
        detector.calls.load(Ordering::SeqCst) > calls_before
    }));
    registry.stop_all();
}

#[test]
fn test_detector_failures_are_absorbed() {
    let captures = FakeCaptures::new();
    let detector = FakeDetector::new();
    detector.fail.store(true, Ordering::SeqCst);
    let registry = registry_with(&captures, &detector);
    let monitor = registry.register("http://broken-model/stream").unwrap();
    let capture = captures.get("http://broken-model/stream");

    assert!(wait_until(Duration::from_secs(2), || {
        capture.push(test_frames::solid(8, 8, 0));
        monitor.status().stats.detector_failures >= 3
    }));
    assert!(monitor.pipeline().is_running());
    assert!(!monitor.status().person.stable);
    registry.stop_all();
}
