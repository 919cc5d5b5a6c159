//! Per-zone presence state machine and its delay timers.
//!
//! The transition function is pure so the full table is testable without a
//! runtime; the supervisor owns the surrounding batching (all member
//! events in one tick collapse to a single team-presence boolean before
//! this is consulted). Timers live here as abortable tasks, at most one
//! per zone, echoing their deadline back so a stale fire is detectable.

use crate::registry::ZoneState;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Outcome of evaluating a zone against current team presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Team fully absent while `Online`: enter `Delay`, arm the timer.
    EnterDelay,
    /// A member returned during `Delay`: cancel the timer, back to `Online`.
    CancelDelay,
    /// The delay elapsed with the team still absent.
    GoOffline,
    /// A member returned from `Offline`.
    GoOnline,
}

pub fn evaluate(state: ZoneState, any_online: bool, deadline_elapsed: bool) -> Transition {
    match (state, any_online) {
        (ZoneState::Online, true) => Transition::None,
        (ZoneState::Online, false) => Transition::EnterDelay,
        (ZoneState::Delay, true) => Transition::CancelDelay,
        (ZoneState::Delay, false) if deadline_elapsed => Transition::GoOffline,
        (ZoneState::Delay, false) => Transition::None,
        (ZoneState::Offline, true) => Transition::GoOnline,
        (ZoneState::Offline, false) => Transition::None,
    }
}

/// A delay timer that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayFired {
    pub zone_id: String,
    pub deadline_ms: u64,
}

/// Cancelable sleep tasks keyed by zone id, at most one live per zone.
pub struct DelayTimers {
    tx: mpsc::UnboundedSender<DelayFired>,
    timers: HashMap<String, (u64, JoinHandle<()>)>,
}

impl DelayTimers {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DelayFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                timers: HashMap::new(),
            },
            rx,
        )
    }

    /// Arms (or re-arms) the zone's timer for the given absolute deadline.
    /// A deadline already in the past fires immediately.
    pub fn arm(&mut self, zone_id: &str, deadline_ms: u64, now_ms: u64) {
        self.cancel(zone_id);
        let wait = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
        let tx = self.tx.clone();
        let id = zone_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(DelayFired {
                zone_id: id,
                deadline_ms,
            });
        });
        self.timers
            .insert(zone_id.to_string(), (deadline_ms, handle));
    }

    /// Aborts the zone's timer. Returns true if one was live.
    pub fn cancel(&mut self, zone_id: &str) -> bool {
        if let Some((_, handle)) = self.timers.remove(zone_id) {
            handle.abort();
            true
        } else {
            false
        }
    }

    /// Consumes a fire notification. Returns false when it is stale: the
    /// timer was re-armed or cancelled after this fire was queued.
    pub fn acknowledge(&mut self, zone_id: &str, deadline_ms: u64) -> bool {
        match self.timers.get(zone_id) {
            Some((armed, _)) if *armed == deadline_ms => {
                self.timers.remove(zone_id);
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self, zone_id: &str) -> Option<u64> {
        self.timers.get(zone_id).map(|(deadline, _)| *deadline)
    }

    /// Aborts everything (teardown).
    pub fn clear(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
