//! # Work Sessions
//!
//! A work session spans the time the person signal of one camera stays
//! Present. [`SessionTracker`] listens to pipeline transitions and drives a
//! [`SessionStore`]; the store is an external persistence boundary, with
//! [`InMemorySessionStore`] as the built-in implementation.
//!
//! ```text
//! person Absent ─▶ Present : start_session(address)
//! person Present ─▶ Absent : end_session(id)
//! pipeline stopped         : end_session(id) if one is open
//! ```
//!
//! Store failures are logged and otherwise ignored: session accounting never
//! affects capture or analysis.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::bail;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta};
use tracing::{info, warn};

use crate::processing::{Presence, Signal, Transition, TransitionObserver};

pub type SessionId = u64;

/// Persistence boundary for work sessions.
pub trait SessionStore: Send + Sync {
    fn start_session(&self, source_id: &str) -> anyhow::Result<SessionId>;

    fn end_session(&self, session_id: SessionId) -> anyhow::Result<()>;

    /// Seconds of work recorded for `source_id` since local midnight,
    /// including a still-open session.
    fn duration_today(&self, source_id: &str) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSession {
    pub id: SessionId,
    pub source_id: String,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
}

impl WorkSession {
    /// Seconds of this session falling on `day`, counting an open session up to `now`.
    fn seconds_on(&self, day: NaiveDate, now: NaiveDateTime) -> u64 {
        let day_start = day.and_time(chrono::NaiveTime::MIN);
        let day_end = day_start + TimeDelta::days(1);

        let start = self.started_at.max(day_start);
        let end = self.ended_at.unwrap_or(now).min(day_end).min(now);
        if end <= start {
            return 0;
        }
        (end - start).num_seconds().max(0) as u64
    }
}

#[derive(Debug, Default)]
struct Sessions {
    next_id: SessionId,
    by_id: BTreeMap<SessionId, WorkSession>,
}

/// Process-local session store keyed by local calendar day.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<Sessions>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session_at(&self, source_id: &str, at: NaiveDateTime) -> SessionId {
        let mut sessions = self.lock();
        sessions.next_id += 1;
        let id = sessions.next_id;
        sessions.by_id.insert(
            id,
            WorkSession {
                id,
                source_id: source_id.to_string(),
                started_at: at,
                ended_at: None,
            },
        );
        id
    }

    pub fn end_session_at(&self, session_id: SessionId, at: NaiveDateTime) -> anyhow::Result<()> {
        let mut sessions = self.lock();
        let Some(session) = sessions.by_id.get_mut(&session_id) else {
            bail!("unknown session {session_id}");
        };
        if session.ended_at.is_some() {
            bail!("session {session_id} already ended");
        }
        session.ended_at = Some(at.max(session.started_at));
        Ok(())
    }

    pub fn duration_on(&self, source_id: &str, day: NaiveDate, now: NaiveDateTime) -> u64 {
        self.lock()
            .by_id
            .values()
            .filter(|s| s.source_id == source_id)
            .map(|s| s.seconds_on(day, now))
            .sum()
    }

    pub fn sessions(&self, source_id: &str) -> Vec<WorkSession> {
        self.lock()
            .by_id
            .values()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn start_session(&self, source_id: &str) -> anyhow::Result<SessionId> {
        Ok(self.start_session_at(source_id, Local::now().naive_local()))
    }

    fn end_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.end_session_at(session_id, Local::now().naive_local())
    }

    fn duration_today(&self, source_id: &str) -> anyhow::Result<u64> {
        let now = Local::now().naive_local();
        Ok(self.duration_on(source_id, now.date(), now))
    }
}

/// Opens and closes sessions from person-signal transitions of one camera.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    current: Mutex<Option<SessionId>>,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Today's recorded seconds, or `None` if the store failed.
    pub fn duration_today(&self, address: &str) -> Option<u64> {
        match self.store.duration_today(address) {
            Ok(seconds) => Some(seconds),
            Err(e) => {
                warn!(address, error = %e, "session duration query failed");
                None
            }
        }
    }

    fn open(&self, address: &str) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if current.is_some() {
            return;
        }
        match self.store.start_session(address) {
            Ok(id) => {
                info!(address, session = id, "work session started");
                *current = Some(id);
            }
            Err(e) => warn!(address, error = %e, "failed to start work session"),
        }
    }

    /// Close the open session, if any.
    pub fn close(&self, address: &str) {
        let Some(id) = self.current.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            return;
        };
        match self.store.end_session(id) {
            Ok(()) => info!(address, session = id, "work session ended"),
            Err(e) => warn!(address, session = id, error = %e, "failed to end work session"),
        }
    }
}

impl TransitionObserver for SessionTracker {
    fn on_transition(&self, address: &str, transition: &Transition) {
        if transition.signal != Signal::Person {
            return;
        }
        match transition.to {
            Presence::Present => self.open(address),
            Presence::Absent => self.close(address),
        }
    }

    fn on_stop(&self, address: &str) {
        self.close(address);
    }
}
