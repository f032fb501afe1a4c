//! # Status Broadcasting
//!
//! Subscribers watch one camera each. A [`Broadcaster`] task wakes every
//! `broadcast_interval_ms`, builds one [`StatusSnapshot`] per watched address,
//! and pushes it to every subscriber of that address.
//!
//! ## Failure Handling
//!
//! A pass works on a copy of the subscriber groups. Sinks whose send fails are
//! collected and removed only after the pass, so a dead subscriber never blocks
//! delivery to the others and the group is never mutated mid-iteration. Groups
//! whose camera has been deregistered are dropped.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    sync::{RwLock, mpsc, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info};

use crate::{
    error::MonitorResult, processing::PipelineStats, registry::MonitorRegistry,
    session::SessionId,
};

/// Status of one camera at one broadcast tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub address: String,
    pub timestamp_ms: u64,
    pub connected: bool,
    pub person: bool,
    pub cup: bool,
    pub motion: bool,
    pub detection_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_frame_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_seconds_today: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
    pub stats: PipelineStats,
}

/// Push-style subscriber endpoint.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one snapshot. An error removes the subscriber after the pass.
    async fn send(&self, snapshot: StatusSnapshot) -> anyhow::Result<()>;
}

#[async_trait]
impl StatusSink for mpsc::UnboundedSender<StatusSnapshot> {
    async fn send(&self, snapshot: StatusSnapshot) -> anyhow::Result<()> {
        mpsc::UnboundedSender::send(self, snapshot).map_err(|_| anyhow!("subscriber closed"))
    }
}

pub type SubscriberId = u64;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
    pub dropped_groups: usize,
}

type Group = Vec<(SubscriberId, Arc<dyn StatusSink>)>;

/// Subscriber groups keyed by resolved camera address.
pub struct SubscriberHub {
    registry: Arc<MonitorRegistry>,
    groups: RwLock<HashMap<String, Group>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    pub fn new(registry: Arc<MonitorRegistry>) -> Self {
        Self {
            registry,
            groups: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<MonitorRegistry> {
        &self.registry
    }

    /// Resolve `query` and add `sink` to that camera's group.
    ///
    /// Returns the resolved address and the subscriber id.
    pub async fn subscribe(
        &self,
        query: &str,
        sink: Arc<dyn StatusSink>,
    ) -> MonitorResult<(String, SubscriberId)> {
        let address = self.registry.resolve(query)?.address().to_string();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.groups
            .write()
            .await
            .entry(address.clone())
            .or_default()
            .push((id, sink));
        info!(%address, subscriber = id, "subscriber added");
        Ok((address, id))
    }

    /// Convenience: subscribe with a fresh unbounded channel.
    pub async fn subscribe_channel(
        &self,
        query: &str,
    ) -> MonitorResult<(SubscriberId, mpsc::UnboundedReceiver<StatusSnapshot>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_, id) = self.subscribe(query, Arc::new(tx)).await?;
        Ok((id, rx))
    }

    pub async fn unsubscribe(&self, address: &str, id: SubscriberId) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(address) else {
            return false;
        };
        let before = group.len();
        group.retain(|(sid, _)| *sid != id);
        let removed = group.len() != before;
        if group.is_empty() {
            groups.remove(address);
        }
        removed
    }

    pub async fn subscriber_count(&self, address: &str) -> usize {
        self.groups.read().await.get(address).map_or(0, Vec::len)
    }

    /// One broadcast pass over every group.
    pub async fn broadcast_once(&self) -> BroadcastReport {
        let groups: Vec<(String, Group)> = self
            .groups
            .read()
            .await
            .iter()
            .map(|(address, group)| (address.clone(), group.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed: Vec<(String, SubscriberId)> = Vec::new();
        let mut gone: Vec<String> = Vec::new();

        for (address, group) in groups {
            let Some(monitor) = self.registry.get(&address) else {
                gone.push(address);
                continue;
            };
            let snapshot = monitor.snapshot();
            for (id, sink) in group {
                match sink.send(snapshot.clone()).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        debug!(%address, subscriber = id, error = %e, "subscriber send failed");
                        failed.push((address.clone(), id));
                    }
                }
            }
        }

        if failed.is_empty() && gone.is_empty() {
            return report;
        }

        let mut groups = self.groups.write().await;
        for address in gone {
            if groups.remove(&address).is_some() {
                report.dropped_groups += 1;
                info!(%address, "dropping subscribers of deregistered monitor");
            }
        }
        for (address, id) in failed {
            if let Some(group) = groups.get_mut(&address) {
                let before = group.len();
                group.retain(|(sid, _)| *sid != id);
                report.removed += before - group.len();
                if group.is_empty() {
                    groups.remove(&address);
                }
            }
        }
        report
    }
}

/// Handle to a running broadcaster task.
pub struct Broadcaster {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Broadcaster {
    /// Spawn the periodic pass on the current tokio runtime.
    pub fn spawn(hub: Arc<SubscriberHub>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        let report = hub.broadcast_once().await;
                        if report.removed > 0 || report.dropped_groups > 0 {
                            debug!(?report, "broadcast pass pruned subscribers");
                        }
                    }
                }
            }
            debug!("broadcaster stopped");
        });
        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stop the task and wait for it.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}
