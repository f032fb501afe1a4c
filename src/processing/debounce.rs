//! # Detection Debouncer
//!
//! Turns noisy per-tick booleans into stable presence states.
//!
//! ```text
//!            raw = true (immediate)
//!   Absent ───────────────────────────▶ Present
//!      ▲                                   │
//!      └─── raw = false and now - last_true > hold
//! ```
//!
//! A positive observation always refreshes `last_true_at_ms`. A negative one
//! only flips the state once the hold time has strictly elapsed.

use serde::Serialize;

use crate::config::DebounceSettings;

/// The debounced signals tracked per camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Person,
    Cup,
    Motion,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Person, Signal::Cup, Signal::Motion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Person => "person",
            Signal::Cup => "cup",
            Signal::Motion => "motion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

/// A change of a signal's stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub signal: Signal,
    pub to: Presence,
    pub at_ms: u64,
}

/// Stable state of one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalState {
    pub stable: bool,
    pub last_true_at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Hysteresis {
    hold_ms: u64,
    state: SignalState,
}

impl Hysteresis {
    fn new(hold_ms: u64) -> Self {
        Self {
            hold_ms,
            state: SignalState::default(),
        }
    }

    fn update(&mut self, raw: bool, now_ms: u64) -> Option<Presence> {
        if raw {
            self.state.last_true_at_ms = now_ms;
            if !self.state.stable {
                self.state.stable = true;
                return Some(Presence::Present);
            }
            return None;
        }

        if self.state.stable && now_ms.saturating_sub(self.state.last_true_at_ms) > self.hold_ms {
            self.state.stable = false;
            return Some(Presence::Absent);
        }
        None
    }
}

/// Person, cup and motion hysteresis for one camera.
#[derive(Debug, Clone)]
pub struct DetectionDebouncer {
    person: Hysteresis,
    cup: Hysteresis,
    motion: Hysteresis,
}

impl DetectionDebouncer {
    pub fn new(settings: DebounceSettings) -> Self {
        Self {
            person: Hysteresis::new(settings.person_hold_ms),
            cup: Hysteresis::new(settings.cup_hold_ms),
            motion: Hysteresis::new(settings.motion_hold_ms),
        }
    }

    /// Feed one raw observation; returns the transition it caused, if any.
    pub fn update(&mut self, signal: Signal, raw: bool, now_ms: u64) -> Option<Transition> {
        self.slot_mut(signal)
            .update(raw, now_ms)
            .map(|to| Transition {
                signal,
                to,
                at_ms: now_ms,
            })
    }

    pub fn state(&self, signal: Signal) -> SignalState {
        self.slot(signal).state
    }

    pub fn is_present(&self, signal: Signal) -> bool {
        self.slot(signal).state.stable
    }

    pub fn hold_ms(&self, signal: Signal) -> u64 {
        self.slot(signal).hold_ms
    }

    fn slot(&self, signal: Signal) -> &Hysteresis {
        match signal {
            Signal::Person => &self.person,
            Signal::Cup => &self.cup,
            Signal::Motion => &self.motion,
        }
    }

    fn slot_mut(&mut self, signal: Signal) -> &mut Hysteresis {
        match signal {
            Signal::Person => &mut self.person,
            Signal::Cup => &mut self.cup,
            Signal::Motion => &mut self.motion,
        }
    }
}

impl Default for DetectionDebouncer {
    fn default() -> Self {
        Self::new(DebounceSettings::default())
    }
}
