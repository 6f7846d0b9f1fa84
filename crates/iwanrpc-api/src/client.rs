//! `IwanClient` — typed method wrappers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use iwanrpc_core::error::TransportError;
use iwanrpc_core::transport::{HealthStatus, RequestOptions, RpcTransport};

use crate::chain::ChainType;

/// Typed front-end over a shared transport.
#[derive(Clone)]
pub struct IwanClient {
    transport: Arc<dyn RpcTransport>,
}

impl IwanClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn health(&self) -> HealthStatus {
        self.transport.health()
    }

    /// Call any method and deserialize the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        self.call_with(method, params, RequestOptions::default()).await
    }

    /// [`call`](Self::call) with per-request options.
    pub async fn call_with<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<T, TransportError> {
        let result = self.transport.request_with(method, params, options).await?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }

    /// Balance of `address` in the chain's smallest unit, as a decimal string.
    pub async fn get_balance(&self, chain: ChainType, address: &str) -> Result<String, TransportError> {
        self.call("getBalance", json!({ "chainType": chain, "address": address }))
            .await
    }

    /// Balances for several addresses, keyed by address.
    pub async fn get_multi_balances(
        &self,
        chain: ChainType,
        addresses: &[&str],
    ) -> Result<HashMap<String, String>, TransportError> {
        self.call(
            "getMultiBalances",
            json!({ "chainType": chain, "address": addresses }),
        )
        .await
    }

    pub async fn get_block_number(&self, chain: ChainType) -> Result<u64, TransportError> {
        self.call("getBlockNumber", json!({ "chainType": chain })).await
    }

    pub async fn get_nonce(&self, chain: ChainType, address: &str) -> Result<Value, TransportError> {
        self.call("getNonce", json!({ "chainType": chain, "address": address }))
            .await
    }

    pub async fn get_gas_price(&self, chain: ChainType) -> Result<String, TransportError> {
        self.call("getGasPrice", json!({ "chainType": chain })).await
    }

    pub async fn get_tx_info(&self, chain: ChainType, tx_hash: &str) -> Result<Value, TransportError> {
        self.call("getTxInfo", json!({ "chainType": chain, "txHash": tx_hash }))
            .await
    }

    pub async fn get_transaction_receipt(
        &self,
        chain: ChainType,
        tx_hash: &str,
    ) -> Result<Value, TransportError> {
        self.call(
            "getTransactionReceipt",
            json!({ "chainType": chain, "txHash": tx_hash }),
        )
        .await
    }

    pub async fn get_block_by_number(
        &self,
        chain: ChainType,
        block_number: u64,
    ) -> Result<Value, TransportError> {
        self.call(
            "getBlockByNumber",
            json!({ "chainType": chain, "blockNumber": block_number }),
        )
        .await
    }

    /// ERC20-style token balance of `address` for the token at `token_sc_addr`.
    pub async fn get_token_balance(
        &self,
        chain: ChainType,
        address: &str,
        token_sc_addr: &str,
    ) -> Result<String, TransportError> {
        self.call(
            "getTokenBalance",
            json!({ "chainType": chain, "address": address, "tokenScAddr": token_sc_addr }),
        )
        .await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}
