//! # Pull Capture
//!
//! Wraps blocking "open once, then read a frame" sources: HTTP MJPEG streams,
//! HTTP snapshot endpoints, and numeric device indices.
//!
//! ## Retry Policy
//!
//! ```text
//! open ─ok─▶ read ─ok─▶ publish, sleep frame interval ─┐
//!   │          │                                       │
//!   │          └─err─┐                                 │
//!   └─err────────────┴▶ release, failures += 1         │
//!                        failures >= budget ─▶ terminal (worker exits)
//!                        else sleep min(failures * step, cap) ─▶ open
//! ```
//!
//! A successful open resets the failure count. Once terminal, the capture
//! stays "running" but disconnected; `start` is a no-op until `stop` is called.

use std::{
    io::Read,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, anyhow, bail};
use reqwest::blocking::{Client, Response};
use tracing::{debug, error, info, warn};

use super::{CameraAddress, CameraCapture, CaptureKind, CaptureState, StopSignal, Worker};
use crate::{
    config::CaptureSettings,
    core::{CapturedFrame, Frame},
    error::{MonitorError, MonitorResult},
};

/// Upper bound on bytes buffered while searching for a JPEG boundary.
const MAX_STREAM_BUFFER: usize = 8 * 1024 * 1024;
const READ_CHUNK: usize = 16 * 1024;

/// A blocking frame source driven by [`PullCapture`].
pub trait PullSource: Send {
    fn open(&mut self) -> anyhow::Result<()>;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> anyhow::Result<Frame>;

    /// Drop any held handle. Called after every failure.
    fn release(&mut self);
}

/// Creates a fresh source for each `start`.
pub trait PullSourceFactory: Send + Sync {
    fn create(&self, address: &str) -> Box<dyn PullSource>;
}

impl<F> PullSourceFactory for F
where
    F: Fn(&str) -> Box<dyn PullSource> + Send + Sync,
{
    fn create(&self, address: &str) -> Box<dyn PullSource> {
        self(address)
    }
}

/// Numeric addresses become [`DeviceSource`], everything else [`HttpFrameSource`].
pub struct DefaultPullSources {
    timeout: Duration,
}

impl DefaultPullSources {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PullSourceFactory for DefaultPullSources {
    fn create(&self, address: &str) -> Box<dyn PullSource> {
        match address.trim().parse::<u32>() {
            Ok(index) => Box::new(DeviceSource { index }),
            Err(_) => Box::new(HttpFrameSource::new(address, self.timeout)),
        }
    }
}

/// Local capture device by index. This build has no device backend, so opening
/// always fails and the capture runs down its failure budget.
#[derive(Debug)]
pub struct DeviceSource {
    index: u32,
}

impl PullSource for DeviceSource {
    fn open(&mut self) -> anyhow::Result<()> {
        bail!("no local capture backend for device {}", self.index)
    }

    fn read_frame(&mut self) -> anyhow::Result<Frame> {
        bail!("device {} is not open", self.index)
    }

    fn release(&mut self) {}
}

enum HttpMode {
    /// `multipart/x-mixed-replace` body; JPEGs are cut out of the byte stream.
    Stream { response: Response, buffer: Vec<u8> },
    /// Plain image endpoint; each read is a new request.
    Snapshot { pending: Option<Vec<u8>> },
}

/// HTTP MJPEG stream or snapshot endpoint.
pub struct HttpFrameSource {
    url: String,
    timeout: Duration,
    client: Option<Client>,
    mode: Option<HttpMode>,
}

impl HttpFrameSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: None,
            mode: None,
        }
    }
}

impl PullSource for HttpFrameSource {
    fn open(&mut self) -> anyhow::Result<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")?;
        let response = fetch(&client, &self.url)?;
        let multipart = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/"));

        let mode = if multipart {
            HttpMode::Stream {
                response,
                buffer: Vec::with_capacity(READ_CHUNK * 4),
            }
        } else {
            let body = response.bytes().context("read snapshot body")?;
            HttpMode::Snapshot {
                pending: Some(body.to_vec()),
            }
        };
        self.client = Some(client);
        self.mode = Some(mode);
        Ok(())
    }

    fn read_frame(&mut self) -> anyhow::Result<Frame> {
        let jpeg = match self.mode.as_mut() {
            None => bail!("{} is not open", self.url),
            Some(HttpMode::Snapshot { pending }) => match pending.take() {
                Some(bytes) => bytes,
                None => {
                    let client = self
                        .client
                        .as_ref()
                        .ok_or_else(|| anyhow!("{} is not open", self.url))?;
                    let body = fetch(client, &self.url)?
                        .bytes()
                        .context("read snapshot body")?;
                    body.to_vec()
                }
            },
            Some(HttpMode::Stream { response, buffer }) => {
                read_stream_jpeg(response, buffer)?
            }
        };
        Ok(Frame::from_jpeg(&jpeg)?)
    }

    fn release(&mut self) {
        self.mode = None;
        self.client = None;
    }
}

fn fetch(client: &Client, url: &str) -> anyhow::Result<Response> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("GET {url}"))?;
    if !response.status().is_success() {
        bail!("GET {url} returned {}", response.status());
    }
    Ok(response)
}

fn read_stream_jpeg(reader: &mut impl Read, buffer: &mut Vec<u8>) -> anyhow::Result<Vec<u8>> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(jpeg) = extract_jpeg(buffer) {
            return Ok(jpeg);
        }
        if buffer.len() > MAX_STREAM_BUFFER {
            buffer.clear();
            bail!("no JPEG boundary within {MAX_STREAM_BUFFER} bytes");
        }
        let read = reader.read(&mut chunk).context("read stream body")?;
        if read == 0 {
            bail!("stream ended");
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Cut the first complete JPEG (SOI `FF D8` .. EOI `FF D9`) out of `buffer`.
///
/// Bytes before the SOI are discarded. Returns `None` and keeps the partial
/// image when no EOI has arrived yet.
pub fn extract_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let Some(start) = find_marker(buffer, 0xD8, 0) else {
        // Keep a trailing 0xFF: it may be the first half of an SOI.
        let keep = usize::from(buffer.last() == Some(&0xFF));
        buffer.drain(..buffer.len() - keep);
        return None;
    };
    let Some(end) = find_marker(buffer, 0xD9, start + 2) else {
        buffer.drain(..start);
        return None;
    };
    let jpeg = buffer[start..end + 2].to_vec();
    buffer.drain(..end + 2);
    Some(jpeg)
}

fn find_marker(buffer: &[u8], marker: u8, from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == [0xFF, marker])
        .map(|pos| pos + from)
}

/// State written by one worker. Every `start` gets a fresh one, so a worker
/// detached by a timed-out `stop` can only write to state nobody reads.
#[derive(Default)]
struct Shared {
    state: CaptureState,
    failures: AtomicU32,
    terminated: AtomicBool,
}

/// Capture over a blocking [`PullSource`].
pub struct PullCapture {
    settings: CaptureSettings,
    sources: Arc<dyn PullSourceFactory>,
    shared: Mutex<Arc<Shared>>,
    worker: Mutex<Option<Worker>>,
    address: Mutex<Option<String>>,
}

impl PullCapture {
    pub fn new(settings: CaptureSettings, sources: Arc<dyn PullSourceFactory>) -> Self {
        Self {
            settings,
            sources,
            shared: Mutex::new(Arc::new(Shared::default())),
            worker: Mutex::new(None),
            address: Mutex::new(None),
        }
    }

    /// Consecutive failures since the last successful open.
    pub fn consecutive_failures(&self) -> u32 {
        self.shared().failures.load(Ordering::Acquire)
    }

    /// Whether the worker exhausted its failure budget.
    pub fn is_terminated(&self) -> bool {
        self.shared().terminated.load(Ordering::Acquire)
    }

    fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl CameraCapture for PullCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Pull
    }

    fn start(&self, address: &CameraAddress) -> MonitorResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return Ok(());
        }
        let CameraAddress::Pull(target) = address else {
            return Err(MonitorError::config(
                "address",
                address.as_str(),
                "not a pull address",
            ));
        };

        let shared = Arc::new(Shared::default());
        *self.shared.lock().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&shared);

        let source = self.sources.create(target);
        let settings = self.settings.clone();
        let target = target.clone();
        *self.address.lock().unwrap_or_else(|p| p.into_inner()) = Some(target.clone());
        *worker = Some(Worker::spawn(format!("pull-capture {target}"), move |stop| {
            run_worker(&target, source, &shared, &settings, &stop)
        })?);
        Ok(())
    }

    fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            worker.stop(self.settings.stop_timeout());
        }
        self.shared().state.set_connected(false);
    }

    fn latest_frame(&self) -> Option<CapturedFrame> {
        self.shared().state.latest()
    }

    fn is_connected(&self) -> bool {
        self.is_running() && self.shared().state.is_connected()
    }

    fn is_running(&self) -> bool {
        self.worker.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    fn terminal_error(&self) -> Option<MonitorError> {
        if !self.is_terminated() {
            return None;
        }
        let address = self
            .address
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .unwrap_or_default();
        Some(MonitorError::terminal_capture(
            address,
            self.consecutive_failures(),
        ))
    }
}

fn run_worker(
    address: &str,
    mut source: Box<dyn PullSource>,
    shared: &Shared,
    settings: &CaptureSettings,
    stop: &StopSignal,
) {
    let mut opened = false;
    let mut failures = 0u32;

    while !stop.is_stopped() {
        if !opened {
            match source.open() {
                Ok(()) => {
                    opened = true;
                    failures = 0;
                    shared.failures.store(0, Ordering::Release);
                    shared.state.set_connected(true);
                    info!(address, "pull source opened");
                }
                Err(e) => {
                    warn!(address, error = %e, "pull source open failed");
                    if back_off(address, source.as_mut(), &mut failures, shared, settings, stop) {
                        break;
                    }
                    continue;
                }
            }
        }

        match source.read_frame() {
            Ok(frame) => {
                shared.state.publish(frame);
                if stop.sleep(settings.pull_frame_interval()) {
                    break;
                }
            }
            Err(e) => {
                warn!(address, error = %e, "pull read failed");
                opened = false;
                if back_off(address, source.as_mut(), &mut failures, shared, settings, stop) {
                    break;
                }
            }
        }
    }

    source.release();
    shared.state.set_connected(false);
    debug!(address, "pull worker exiting");
}

/// Record one failure and wait. Returns `true` when the worker must exit.
fn back_off(
    address: &str,
    source: &mut dyn PullSource,
    failures: &mut u32,
    shared: &Shared,
    settings: &CaptureSettings,
    stop: &StopSignal,
) -> bool {
    shared.state.set_connected(false);
    source.release();
    *failures += 1;
    shared.failures.store(*failures, Ordering::Release);

    if *failures >= settings.pull_max_failures {
        shared.terminated.store(true, Ordering::Release);
        error!(
            address,
            failures = *failures,
            "pull capture giving up; stop and start to retry"
        );
        return true;
    }

    let backoff = settings.pull_backoff(*failures);
    debug!(address, failures = *failures, ?backoff, "pull capture backing off");
    stop.sleep(backoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_jpeg_between_markers() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        buffer.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame\r\n");
        buffer.extend_from_slice(&[0xFF, 0xD8, 9]);

        assert_eq!(
            extract_jpeg(&mut buffer),
            Some(vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9])
        );
        // The second image is still partial.
        assert_eq!(extract_jpeg(&mut buffer), None);
        assert_eq!(buffer, vec![0xFF, 0xD8, 9]);

        buffer.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(extract_jpeg(&mut buffer), Some(vec![0xFF, 0xD8, 9, 0xFF, 0xD9]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn keeps_split_start_marker() {
        let mut buffer = vec![b'x', b'y', 0xFF];
        assert_eq!(extract_jpeg(&mut buffer), None);
        assert_eq!(buffer, vec![0xFF]);

        buffer.extend_from_slice(&[0xD8, 7, 0xFF, 0xD9]);
        assert_eq!(extract_jpeg(&mut buffer), Some(vec![0xFF, 0xD8, 7, 0xFF, 0xD9]));
    }

    #[test]
    fn reads_frames_from_multipart_body() {
        let image = Frame::new(image::RgbImage::new(16, 16)).to_jpeg(80).unwrap();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&image);
            body.extend_from_slice(b"\r\n");
        }
        let mut reader = std::io::Cursor::new(body);
        let mut buffer = Vec::new();

        assert_eq!(read_stream_jpeg(&mut reader, &mut buffer).unwrap(), image);
        assert_eq!(read_stream_jpeg(&mut reader, &mut buffer).unwrap(), image);
        assert!(read_stream_jpeg(&mut reader, &mut buffer).is_err());
    }

    #[test]
    fn numeric_address_is_a_device() {
        let sources = DefaultPullSources::new(Duration::from_millis(100));
        let mut device = sources.create("0");
        assert!(device.open().is_err());
    }
}
