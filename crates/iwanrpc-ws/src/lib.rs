//! iwanrpc-ws — authenticated WebSocket JSON-RPC transport.
//!
//! # Features
//! - Request multiplexing over a single connection, correlated by id
//! - HMAC-signed requests; unsigned requests never reach the wire
//! - Per-request timeouts enforced by a periodic sweep
//! - Ping heartbeat with a missed-probe budget
//! - Fixed-delay auto-reconnect; outstanding requests fail, never resend

pub mod client;
pub mod connection;
mod heartbeat;
mod pending;

pub use client::WsTransport;
pub use connection::ConnectionState;
