//! # WebSocket Capture
//!
//! Client of a push camera: every binary message is one complete JPEG. There
//! is no reassembly. Text, ping and pong messages are discarded.
//!
//! The worker thread drives a current-thread tokio runtime so the async
//! WebSocket client can be raced against the stop signal with `select!`.
//! Connect failures and dropped connections are retried after a fixed wait for
//! as long as the capture is running.
//!
//! A live session sends a ping every `ws_ping_interval_ms`. Any inbound
//! message (frame, pong, text) pushes the idle deadline out by
//! `ws_idle_timeout_ms`; a camera that vanishes without closing the socket
//! therefore counts as lost once the deadline passes.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, timeout_at};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{CameraAddress, CameraCapture, CaptureKind, CaptureState, StopSignal, Worker};
use crate::{
    config::CaptureSettings,
    core::{CapturedFrame, Frame},
    error::{MonitorError, MonitorResult},
};

pub struct WebSocketCapture {
    settings: CaptureSettings,
    state: Arc<CaptureState>,
    worker: Mutex<Option<Worker>>,
}

impl WebSocketCapture {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            state: Arc::new(CaptureState::new()),
            worker: Mutex::new(None),
        }
    }
}

impl CameraCapture for WebSocketCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::WebSocket
    }

    fn start(&self, address: &CameraAddress) -> MonitorResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return Ok(());
        }
        let CameraAddress::WebSocket(url) = address else {
            return Err(MonitorError::config(
                "address",
                address.as_str(),
                "not a ws:// or wss:// address",
            ));
        };

        let url = url.clone();
        let state = Arc::clone(&self.state);
        let settings = self.settings.clone();
        *worker = Some(Worker::spawn(format!("ws-capture {url}"), move |stop| {
            run_worker(&url, &state, &settings, &stop)
        })?);
        Ok(())
    }

    fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            worker.stop(self.settings.stop_timeout());
        }
        self.state.set_connected(false);
    }

    fn latest_frame(&self) -> Option<CapturedFrame> {
        self.state.latest()
    }

    fn is_connected(&self) -> bool {
        self.is_running() && self.state.is_connected()
    }

    fn is_running(&self) -> bool {
        self.worker.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

fn run_worker(url: &str, state: &CaptureState, settings: &CaptureSettings, stop: &StopSignal) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(address = url, error = %e, "failed to build websocket runtime");
            return;
        }
    };

    runtime.block_on(async {
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                result = receive_frames(url, state, settings) => match result {
                    Ok(()) => info!(address = url, "websocket closed by camera"),
                    Err(e) => warn!(address = url, error = %e, "websocket session failed"),
                },
            }
            state.set_connected(false);
            if stop.sleep_async(settings.ws_retry()).await {
                break;
            }
            debug!(address = url, "reconnecting websocket");
        }
    });

    state.set_connected(false);
    debug!(address = url, "websocket worker exiting");
}

/// One connection: connect, then decode binary messages until the stream
/// ends, errors or goes quiet past the idle timeout.
async fn receive_frames(
    url: &str,
    state: &CaptureState,
    settings: &CaptureSettings,
) -> MonitorResult<()> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| MonitorError::network_with_source("connect", Some(url.to_string()), e))?;
    info!(address = url, "websocket connected");
    state.set_connected(true);

    let (mut sink, mut stream) = stream.split();
    let idle = settings.ws_idle_timeout();
    let mut deadline = Instant::now() + idle;
    let mut ping = tokio::time::interval(settings.ws_ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                sink.send(Message::Ping(Default::default()))
                    .await
                    .map_err(|e| MonitorError::network_with_source("ping", Some(url.to_string()), e))?;
            }
            next = timeout_at(deadline, stream.next()) => {
                let Ok(next) = next else {
                    warn!(address = url, idle_ms = idle.as_millis() as u64, "websocket silent, dropping session");
                    return Err(MonitorError::network("idle timeout", Some(url.to_string())));
                };
                let Some(message) = next else {
                    return Ok(());
                };
                let message = message
                    .map_err(|e| MonitorError::network_with_source("receive", Some(url.to_string()), e))?;
                deadline = Instant::now() + idle;
                match message {
                    Message::Binary(bytes) => match Frame::from_jpeg(&bytes) {
                        Ok(frame) => state.publish(frame),
                        Err(e) => debug!(address = url, error = %e, "dropping undecodable frame"),
                    },
                    Message::Close(_) => return Ok(()),
                    other => debug!(address = url, len = other.len(), "discarding non-binary message"),
                }
            }
        }
    }
}
