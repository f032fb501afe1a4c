//! Common test utilities shared by the integration tests.
//!
//! Synthetic JPEG frames, a scriptable in-memory capture, and a scriptable
//! detector, so registry and pipeline behaviour can be tested without cameras.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use camera_monitor::{
    CameraAddress, CameraCapture, CaptureKind, CapturedFrame, Frame, MonitorResult, now_ms,
    processing::{BoundingBox, Detection, Detector},
};
use image::{Rgb, RgbImage};

/// Solid-colour test frames and their JPEG encodings.
pub mod test_frames {
    use super::*;

    pub fn solid(width: u32, height: u32, shade: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, Rgb([shade, shade, shade])))
    }

    pub fn jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
        solid(width, height, shade)
            .to_jpeg(90)
            .expect("encode test frame")
    }
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Shared record of lifecycle events, in the order they happened.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// Capture whose frames are pushed by the test.
#[derive(Default)]
pub struct FakeCapture {
    events: EventLog,
    latest: Mutex<Option<CapturedFrame>>,
    running: AtomicBool,
    connected: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl FakeCapture {
    pub fn push(&self, frame: Frame) {
        *self.latest.lock().unwrap() = Some(CapturedFrame {
            frame,
            captured_at_ms: now_ms(),
        });
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn push_at(&self, frame: Frame, captured_at_ms: u64) {
        *self.latest.lock().unwrap() = Some(CapturedFrame {
            frame,
            captured_at_ms,
        });
    }
}

impl CameraCapture for FakeCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Pull
    }

    fn start(&self, _address: &CameraAddress) -> MonitorResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push("capture stopped");
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn latest_frame(&self) -> Option<CapturedFrame> {
        self.latest.lock().unwrap().clone()
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Factory handing out [`FakeCapture`]s and remembering them by address.
#[derive(Default)]
pub struct FakeCaptures {
    by_address: Mutex<HashMap<String, Arc<FakeCapture>>>,
    pub created: AtomicUsize,
    /// Every capture handed out appends to this log.
    pub events: EventLog,
}

impl FakeCaptures {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, address: &str) -> Arc<FakeCapture> {
        Arc::clone(
            self.by_address
                .lock()
                .unwrap()
                .get(address)
                .expect("capture was created"),
        )
    }
}

impl camera_monitor::capture::CaptureFactory for FakeCaptures {
    fn create(&self, address: &CameraAddress) -> Arc<dyn CameraCapture> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let capture = Arc::new(FakeCapture {
            events: Arc::clone(&self.events),
            ..FakeCapture::default()
        });
        self.by_address
            .lock()
            .unwrap()
            .insert(address.to_string(), Arc::clone(&capture));
        capture
    }
}

/// Detector whose answer is set by the test.
#[derive(Default)]
pub struct FakeDetector {
    pub person: AtomicBool,
    pub cup: AtomicBool,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Detector for FakeDetector {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("detector unavailable");
        }
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: frame.width() as f32,
            y2: frame.height() as f32,
        };
        let mut detections = Vec::new();
        if self.person.load(Ordering::SeqCst) {
            detections.push(Detection::new("person", 0.9, bbox));
        }
        if self.cup.load(Ordering::SeqCst) {
            detections.push(Detection::new("cup", 0.8, bbox));
        }
        Ok(detections)
    }
}
