//! iwanrpc-api — typed iWan methods over any [`RpcTransport`].
//!
//! The facade holds an `Arc<dyn RpcTransport>`; each method only builds a
//! `{method, params}` pair and decodes the result.
//!
//! # Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use iwanrpc_api::{ChainType, IwanClient};
//! use iwanrpc_core::ClientConfig;
//! use iwanrpc_ws::WsTransport;
//!
//! # async fn run() -> Result<(), iwanrpc_core::TransportError> {
//! let transport = WsTransport::connect(ClientConfig::from_env()?).await?;
//! let iwan = IwanClient::new(Arc::new(transport));
//! let balance = iwan.get_balance(ChainType::Wan, "0xabc").await?;
//! # Ok(()) }
//! ```
//!
//! [`RpcTransport`]: iwanrpc_core::RpcTransport

pub mod chain;
pub mod client;

pub use chain::ChainType;
pub use client::IwanClient;
