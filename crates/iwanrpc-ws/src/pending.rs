//! In-flight request table and timeout sweep.
//!
//! Every entry leaves the table exactly once: through [`PendingRegistry::resolve`],
//! [`PendingRegistry::sweep_expired`] or [`PendingRegistry::fail_all`]. Each of
//! those removes the entry before completing its responder, and a `oneshot`
//! sender can only be consumed once.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use iwanrpc_core::error::TransportError;
use iwanrpc_core::request::RpcId;

pub(crate) type RequestResult = Result<Value, TransportError>;
pub(crate) type Responder = oneshot::Sender<RequestResult>;

/// A request awaiting its response.
pub(crate) struct PendingRequest {
    method: String,
    issued_at: Instant,
    timeout: Duration,
    responder: Responder,
}

impl PendingRequest {
    pub(crate) fn new(
        method: impl Into<String>,
        timeout: Duration,
        issued_at: Instant,
        responder: Responder,
    ) -> Self {
        Self {
            method: method.into(),
            issued_at,
            timeout,
            responder,
        }
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    /// Complete with an error without ever entering a registry.
    pub(crate) fn fail(self, error: TransportError) {
        self.complete(Err(error));
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) >= self.timeout
    }

    fn complete(self, result: RequestResult) {
        if self.responder.send(result).is_err() {
            tracing::debug!(method = %self.method, "caller went away before its request completed");
        }
    }
}

/// A request removed by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Expired {
    pub id: RpcId,
    pub method: String,
    pub age: Duration,
}

#[derive(Default)]
pub(crate) struct PendingRegistry {
    entries: HashMap<RpcId, PendingRequest>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request. An id that is already pending is rejected and the
    /// request is handed back untouched.
    pub(crate) fn insert(&mut self, id: RpcId, req: PendingRequest) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&id) {
            return Err(req);
        }
        self.entries.insert(id, req);
        Ok(())
    }

    /// Complete the request with `id`. Returns `false` if no such request is
    /// pending (already timed out, drained, or never issued).
    pub(crate) fn resolve(&mut self, id: RpcId, result: RequestResult) -> bool {
        match self.entries.remove(&id) {
            Some(req) => {
                req.complete(result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending request. Returns how many were failed.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> TransportError) -> usize {
        let drained: Vec<_> = self.entries.drain().collect();
        let count = drained.len();
        for (_, req) in drained {
            req.complete(Err(error()));
        }
        count
    }

    /// Remove and time out every request whose deadline is at or before `now`.
    pub(crate) fn sweep_expired(&mut self, now: Instant) -> Vec<Expired> {
        let ids: Vec<RpcId> = self
            .entries
            .iter()
            .filter(|(_, req)| req.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(req) = self.entries.remove(&id) else {
                continue;
            };
            let age = now.saturating_duration_since(req.issued_at);
            expired.push(Expired {
                id,
                method: req.method.clone(),
                age,
            });
            let err = TransportError::Timeout {
                method: req.method.clone(),
                ms: req.timeout.as_millis() as u64,
            };
            req.complete(Err(err));
        }
        expired
    }

    pub(crate) fn contains(&self, id: RpcId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
