//! # UDP Chunked-JPEG Capture
//!
//! Cameras push each JPEG as a burst of datagrams (see the `cam_udp` crate for
//! the wire format). Several cameras may share one bind address; datagrams are
//! routed by sender IP.
//!
//! ## Architecture
//!
//! ```text
//! UdpListenerPool ── bind addr ──▶ UdpListener (one socket, one worker)
//!                                      │
//!                                      ├── 10.0.0.1 ─▶ ReassemblyBuffer ─▶ CaptureState
//!                                      └── 10.0.0.2 ─▶ ReassemblyBuffer ─▶ CaptureState
//! ```
//!
//! - The pool map and each listener's client map are mutex-protected; the
//!   receive worker only reads the client map for the duration of one push.
//! - A listener is created by the first registration for its bind address and
//!   torn down by the last deregistration. A live port is never bound twice.
//! - JPEG decode happens outside the client-map lock.
//! - Sender and registered IPs are compared in canonical form, so an IPv4
//!   camera still matches when a dual-stack (`[::]`) socket reports it as
//!   `::ffff:a.b.c.d`.
//! - Malformed datagrams, unknown senders, incomplete frames and corrupt JPEGs
//!   are dropped, logged and counted in [`UdpStatsSnapshot`].

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr, UdpSocket},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use cam_udp::{Outcome, ReassemblyBuffer, parse_datagram};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CameraAddress, CameraCapture, CaptureKind, CaptureState, StopSignal, Worker};
use crate::{
    config::CaptureSettings,
    core::{CapturedFrame, Frame},
    error::{MonitorError, MonitorResult},
};

/// Largest datagram the receive loop accepts.
const RECV_BUFFER_LEN: usize = 65_536;

static GLOBAL_POOL: Lazy<Arc<UdpListenerPool>> = Lazy::new(|| Arc::new(UdpListenerPool::new()));

#[derive(Debug, Default)]
struct UdpStats {
    datagrams: AtomicU64,
    malformed: AtomicU64,
    unknown_source: AtomicU64,
    incomplete: AtomicU64,
    decode_failures: AtomicU64,
    evicted: AtomicU64,
    decoded: AtomicU64,
}

/// Point-in-time copy of a listener's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UdpStatsSnapshot {
    pub datagrams: u64,
    pub malformed: u64,
    pub unknown_source: u64,
    pub incomplete: u64,
    pub decode_failures: u64,
    pub evicted: u64,
    pub decoded: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Client {
    buffer: ReassemblyBuffer,
    state: Arc<CaptureState>,
}

/// One bound socket and the senders multiplexed on it.
pub struct UdpListener {
    bind: SocketAddr,
    local_addr: SocketAddr,
    max_in_flight: usize,
    clients: Mutex<HashMap<IpAddr, Client>>,
    stats: UdpStats,
}

impl UdpListener {
    fn new(bind: SocketAddr, local_addr: SocketAddr, max_in_flight: usize) -> Self {
        Self {
            bind,
            local_addr,
            max_in_flight,
            clients: Mutex::new(HashMap::new()),
            stats: UdpStats::default(),
        }
    }

    /// Route one datagram to its sender's reassembly buffer.
    pub fn handle_datagram(&self, source: IpAddr, datagram: &[u8]) {
        bump(&self.stats.datagrams);
        let source = source.to_canonical();

        let chunk = match parse_datagram(datagram) {
            Ok(chunk) => chunk,
            Err(e) => {
                bump(&self.stats.malformed);
                debug!(bind = %self.bind, %source, error = %e, "dropping malformed datagram");
                return;
            }
        };

        let (outcome, state) = {
            let mut clients = self.lock_clients();
            let Some(client) = clients.get_mut(&source) else {
                bump(&self.stats.unknown_source);
                warn!(bind = %self.bind, %source, "datagram from unregistered source dropped");
                return;
            };
            let evicted_before = client.buffer.stats().evicted;
            let outcome = client.buffer.push(chunk.header, chunk.payload);
            let evicted = client.buffer.stats().evicted - evicted_before;
            if evicted > 0 {
                self.stats.evicted.fetch_add(evicted, Ordering::Relaxed);
            }
            (outcome, Arc::clone(&client.state))
        };

        match outcome {
            Outcome::Pending => {}
            Outcome::Incomplete {
                frame_index,
                missing,
            } => {
                bump(&self.stats.incomplete);
                debug!(%source, frame_index, missing, "dropping incomplete frame");
            }
            Outcome::Complete { frame_index, bytes } => match Frame::from_jpeg(&bytes) {
                Ok(frame) => {
                    bump(&self.stats.decoded);
                    state.publish(frame);
                }
                Err(e) => {
                    bump(&self.stats.decode_failures);
                    debug!(%source, frame_index, error = %e, "dropping undecodable frame");
                }
            },
        }
    }

    /// The address the socket is actually bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    pub fn has_client(&self, source: IpAddr) -> bool {
        self.lock_clients().contains_key(&source.to_canonical())
    }

    /// Frames currently buffered for `source`.
    pub fn in_flight(&self, source: IpAddr) -> Option<usize> {
        self.lock_clients()
            .get(&source.to_canonical())
            .map(|client| client.buffer.in_flight())
    }

    pub fn stats(&self) -> UdpStatsSnapshot {
        let s = &self.stats;
        UdpStatsSnapshot {
            datagrams: s.datagrams.load(Ordering::Relaxed),
            malformed: s.malformed.load(Ordering::Relaxed),
            unknown_source: s.unknown_source.load(Ordering::Relaxed),
            incomplete: s.incomplete.load(Ordering::Relaxed),
            decode_failures: s.decode_failures.load(Ordering::Relaxed),
            evicted: s.evicted.load(Ordering::Relaxed),
            decoded: s.decoded.load(Ordering::Relaxed),
        }
    }

    fn add_client(&self, source: IpAddr, state: Arc<CaptureState>) -> MonitorResult<()> {
        let source = source.to_canonical();
        let mut clients = self.lock_clients();
        if clients.contains_key(&source) {
            return Err(MonitorError::state(
                format!("{source} already registered on {}", self.bind),
                "register source",
            ));
        }
        clients.insert(
            source,
            Client {
                buffer: ReassemblyBuffer::new(self.max_in_flight),
                state,
            },
        );
        Ok(())
    }

    /// Remove `source`; returns the number of clients left.
    fn remove_client(&self, source: IpAddr) -> usize {
        let mut clients = self.lock_clients();
        clients.remove(&source.to_canonical());
        clients.len()
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<IpAddr, Client>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn receive_loop(listener: &UdpListener, socket: &UdpSocket, idle: Duration, stop: &StopSignal) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    while !stop.is_stopped() {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => listener.handle_datagram(from.ip(), &buf[..len]),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                warn!(bind = %listener.bind, error = %e, "udp receive failed");
                if stop.sleep(idle) {
                    break;
                }
            }
        }
    }
    debug!(bind = %listener.bind, "udp listener exiting");
}

struct ListenerEntry {
    listener: Arc<UdpListener>,
    worker: Worker,
}

/// Registry of live listeners keyed by bind address.
#[derive(Default)]
pub struct UdpListenerPool {
    listeners: Mutex<HashMap<SocketAddr, ListenerEntry>>,
}

impl UdpListenerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide pool used by default captures.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_POOL)
    }

    /// Attach `source` to the listener on `bind`, creating it on first use.
    pub fn register(
        &self,
        bind: SocketAddr,
        source: IpAddr,
        state: Arc<CaptureState>,
        settings: &CaptureSettings,
    ) -> MonitorResult<Arc<UdpListener>> {
        let mut listeners = self.lock_listeners();

        if let Some(entry) = listeners.get(&bind) {
            entry.listener.add_client(source, state)?;
            info!(%bind, %source, "source added to existing udp listener");
            return Ok(Arc::clone(&entry.listener));
        }

        let socket = UdpSocket::bind(bind)
            .map_err(|e| MonitorError::io(format!("bind udp listener {bind}"), e))?;
        socket
            .set_read_timeout(Some(settings.udp_recv_timeout()))
            .map_err(|e| MonitorError::io("set udp read timeout", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| MonitorError::io("query udp local address", e))?;

        let listener = Arc::new(UdpListener::new(bind, local_addr, settings.udp_max_in_flight));
        listener.add_client(source, state)?;

        let worker_listener = Arc::clone(&listener);
        let idle = settings.udp_recv_timeout();
        let worker = Worker::spawn(format!("udp-listener {local_addr}"), move |stop| {
            receive_loop(&worker_listener, &socket, idle, &stop)
        })?;

        info!(%bind, %local_addr, %source, "udp listener started");
        listeners.insert(
            bind,
            ListenerEntry {
                listener: Arc::clone(&listener),
                worker,
            },
        );
        Ok(listener)
    }

    /// Detach `source`; the last detach closes the socket.
    ///
    /// The listener worker is stopped while the pool lock is held, so a
    /// concurrent registration on the same bind address cannot race the old
    /// socket for the port.
    pub fn deregister(&self, bind: SocketAddr, source: IpAddr, timeout: Duration) {
        let mut listeners = self.lock_listeners();
        let Some(entry) = listeners.get(&bind) else {
            return;
        };
        let remaining = entry.listener.remove_client(source);
        debug!(%bind, %source, remaining, "source removed from udp listener");
        if remaining > 0 {
            return;
        }
        if let Some(entry) = listeners.remove(&bind) {
            entry.worker.stop(timeout);
            info!(%bind, "udp listener closed");
        }
    }

    pub fn listener(&self, bind: SocketAddr) -> Option<Arc<UdpListener>> {
        self.lock_listeners()
            .get(&bind)
            .map(|entry| Arc::clone(&entry.listener))
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, HashMap<SocketAddr, ListenerEntry>> {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    bind: SocketAddr,
    source: IpAddr,
}

/// One camera on a (possibly shared) UDP listener.
pub struct UdpCapture {
    settings: CaptureSettings,
    pool: Arc<UdpListenerPool>,
    state: Arc<CaptureState>,
    registration: Mutex<Option<Registration>>,
}

impl UdpCapture {
    pub fn new(settings: CaptureSettings, pool: Arc<UdpListenerPool>) -> Self {
        Self {
            settings,
            pool,
            state: Arc::new(CaptureState::new()),
            registration: Mutex::new(None),
        }
    }

    /// The listener this capture is attached to, while running.
    pub fn listener(&self) -> Option<Arc<UdpListener>> {
        let registration = *self.registration.lock().unwrap_or_else(|p| p.into_inner());
        registration.and_then(|r| self.pool.listener(r.bind))
    }
}

impl CameraCapture for UdpCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Udp
    }

    fn start(&self, address: &CameraAddress) -> MonitorResult<()> {
        let mut registration = self.registration.lock().unwrap_or_else(|p| p.into_inner());
        if registration.is_some() {
            return Ok(());
        }
        let CameraAddress::Udp { bind, source, .. } = address else {
            return Err(MonitorError::config(
                "address",
                address.as_str(),
                "not a udpserver:// address",
            ));
        };

        self.pool
            .register(*bind, *source, Arc::clone(&self.state), &self.settings)?;
        *registration = Some(Registration {
            bind: *bind,
            source: *source,
        });
        Ok(())
    }

    fn stop(&self) {
        let registration = self.registration.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(Registration { bind, source }) = registration {
            self.pool
                .deregister(bind, source, self.settings.stop_timeout());
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
        self.registration
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}
