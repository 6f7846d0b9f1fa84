//! Missed-probe accounting for the liveness heartbeat.
//!
//! The connection task calls [`HeartbeatMonitor::tick`] once per interval
//! while the socket is open, and [`HeartbeatMonitor::record_liveness`] for
//! every inbound frame (pongs included).

use std::time::Duration;

use tokio::time::Instant;

/// What the connection task should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    /// Send a ping.
    Probe,
    /// The budget is exhausted; treat the connection as dead.
    Dead,
}

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    max_missed: u32,
    remaining: u32,
    seen_since_tick: bool,
    last_liveness: Instant,
}

impl HeartbeatMonitor {
    pub(crate) fn new(interval: Duration, max_missed: u32, now: Instant) -> Self {
        Self {
            interval,
            max_missed,
            remaining: max_missed,
            seen_since_tick: true,
            last_liveness: now,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }

    pub(crate) fn last_liveness(&self) -> Instant {
        self.last_liveness
    }

    /// Full budget for a freshly opened socket; the handshake counts as liveness.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.remaining = self.max_missed;
        self.seen_since_tick = true;
        self.last_liveness = now;
    }

    pub(crate) fn record_liveness(&mut self, now: Instant) {
        self.seen_since_tick = true;
        self.last_liveness = now;
    }

    pub(crate) fn tick(&mut self) -> HeartbeatAction {
        if std::mem::take(&mut self.seen_since_tick) {
            self.remaining = self.max_missed;
            return HeartbeatAction::Probe;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            HeartbeatAction::Dead
        } else {
            HeartbeatAction::Probe
        }
    }
}
