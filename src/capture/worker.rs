//! # Owned Worker Threads
//!
//! Every capture, UDP listener and pipeline owns exactly one [`Worker`]: a named
//! OS thread plus the two channels used to stop it.
//!
//! ```text
//!  owner                         worker thread
//!  ─────                         ─────────────
//!  Worker::stop ── drop stop_tx ─▶ StopSignal sees Disconnected
//!        │                         loop exits, closure returns
//!        ◀────── done_rx Disconnected (done_tx dropped)
//!  join (bounded by timeout)
//! ```
//!
//! Sleeps inside the worker go through [`StopSignal::sleep`], which returns as
//! soon as the owner asks to stop, so backoff waits never delay shutdown.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{debug, warn};

use crate::error::{MonitorError, MonitorResult};

/// Poll period used by async code waiting on a [`StopSignal`].
const ASYNC_POLL: Duration = Duration::from_millis(50);

/// Worker-side view of the stop request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Whether the owner has asked the worker to exit.
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `true` if the worker should exit.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => true,
        }
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        while !self.is_stopped() {
            tokio::time::sleep(ASYNC_POLL).await;
        }
    }

    /// Async counterpart of [`StopSignal::sleep`].
    pub async fn sleep_async(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = self.stopped() => true,
        }
    }
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a named thread. The thread exits when `body` returns.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> MonitorResult<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        // Nothing is ever sent on either channel; disconnection is the signal.
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        let signal = StopSignal { rx: stop_rx };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _done = done_tx;
                body(signal);
            })
            .map_err(|e| MonitorError::io(format!("spawn worker {name}"), e))?;

        debug!(worker = %name, "worker started");
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread body has already returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the worker and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the worker did not finish in time; it is then detached
    /// and will exit on its own at its next stop check.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop_tx.take();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        if handle.thread().id() == thread::current().id() {
            // Stopping from inside the worker; it exits when the caller returns.
            return true;
        }

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(worker = %self.name, "worker panicked");
                }
                debug!(worker = %self.name, "worker stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(worker = %self.name, ?timeout, "worker did not stop in time, detaching");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Instant,
    };

    #[test]
    fn stop_interrupts_long_sleep() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);
        let worker = Worker::spawn("test-sleeper", move |stop| {
            while !stop.sleep(Duration::from_secs(60)) {}
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let started = Instant::now();
        assert!(worker.stop(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn finished_worker_is_reported() {
        let worker = Worker::spawn("test-oneshot", |_stop| {}).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_finished());
        assert!(worker.stop(Duration::from_secs(1)));
    }

    #[test]
    fn stuck_worker_is_detached() {
        let worker = Worker::spawn("test-stuck", |_stop| {
            thread::sleep(Duration::from_millis(300));
        })
        .unwrap();
        assert!(!worker.stop(Duration::from_millis(10)));
    }
}
