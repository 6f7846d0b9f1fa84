//! iwanrpc-core — foundation traits and types for iwanrpc.
//!
//! # Overview
//!
//! iwanrpc talks to an iWan JSON-RPC service over one authenticated,
//! persistent WebSocket. The core crate defines:
//!
//! - [`RpcTransport`] — the async request/close capability facades hold
//! - [`JsonRpcRequest`] / [`InboundFrame`] — wire types and frame decoding
//! - [`Signer`] / [`HmacSigner`] — request signing
//! - [`ClientConfig`] — per-instance endpoint, credentials and timings
//! - [`TransportError`] — structured error type

pub mod auth;
pub mod config;
pub mod error;
pub mod request;
pub mod transport;

pub use auth::{HmacSigner, SignedEnvelope, Signer};
pub use config::ClientConfig;
pub use error::TransportError;
pub use request::{InboundFrame, JsonRpcError, JsonRpcRequest, RpcId};
pub use transport::{HealthStatus, RequestOptions, RpcTransport};
