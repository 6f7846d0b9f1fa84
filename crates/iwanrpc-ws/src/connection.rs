//! Connection lifecycle state.
//!
//! State transitions:
//! - `Connecting` → `Open`:    handshake succeeded
//! - `Connecting` → `Closed`:  handshake failed
//! - `Open` → `Closed`:        socket error, remote close or heartbeat death
//! - `Open` → `Closing`:       caller asked to close
//! - `Closing` → `Closed`:     close finished; terminal
//! - `Closed` → `Connecting`:  reconnect delay elapsed (never after a caller close)

use tokio::sync::watch;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// State owned by the connection task. Every change is published on a
/// `watch` channel so handles can observe it without locking.
pub(crate) struct Connection {
    state: ConnectionState,
    active_close: bool,
    reconnecting: bool,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Starts in `Connecting`: the first attempt is issued at construction.
    pub(crate) fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let conn = Self {
            state: ConnectionState::Connecting,
            active_close: false,
            reconnecting: false,
            state_tx,
        };
        (conn, state_rx)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_active_close(&self) -> bool {
        self.active_close
    }

    fn set(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// `Closed` → `Connecting`. Returns `false` if a caller close is in effect.
    pub(crate) fn begin_connect(&mut self) -> bool {
        if self.active_close || self.state != ConnectionState::Closed {
            return false;
        }
        self.set(ConnectionState::Connecting);
        true
    }

    pub(crate) fn mark_open(&mut self) {
        self.reconnecting = false;
        self.set(ConnectionState::Open);
    }

    /// Caller-initiated close. Disables any further reconnects.
    pub(crate) fn begin_close(&mut self) {
        self.active_close = true;
        if self.state != ConnectionState::Closed {
            self.set(ConnectionState::Closing);
        }
    }

    /// Transition into `Closed`. Returns `true` only on an actual transition,
    /// so a loss seen by two detectors is drained once.
    pub(crate) fn mark_closed(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        if self.state == ConnectionState::Connecting {
            // the attempt this guard protected has resolved
            self.reconnecting = false;
        }
        self.set(ConnectionState::Closed);
        true
    }

    /// Claim the reconnect guard. Returns `false` if a reconnect is already
    /// scheduled or running, or if the close was caller-initiated.
    pub(crate) fn try_schedule_reconnect(&mut self) -> bool {
        if self.active_close || self.reconnecting {
            return false;
        }
        self.reconnecting = true;
        true
    }
}
