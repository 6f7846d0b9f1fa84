//! JSON-RPC 2.0 wire types and inbound frame decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// JSON-RPC request ID. iWan only ever uses integers.
pub type RpcId = u64;

/// The protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request, before signing.
///
/// Field order matters: the signature is computed over the serialized
/// body, so `jsonrpc, method, params, id` must stay in this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build from whatever the server put in `error`.
    ///
    /// Well-formed `{code, message, data}` objects map field by field. Anything
    /// else (a bare string, an object with other keys) keeps its text in
    /// `message` and the raw value in `data`.
    pub fn from_value(value: Value) -> Self {
        if let Some(obj) = value.as_object() {
            if obj.contains_key("code") || obj.contains_key("message") {
                if let Ok(err) = serde_json::from_value::<JsonRpcError>(value.clone()) {
                    return err;
                }
            }
        }
        let message = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            code: 0,
            message,
            data: Some(value),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A correlated response: either `result` or `error`.
    Response {
        id: RpcId,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Carries an id, but `result` and `error` are both present or both missing.
    Malformed { id: RpcId, reason: String },
    /// A server-initiated message with no id.
    Notification { method: Option<String> },
}

impl InboundFrame {
    /// Decode a text frame. Returns a `Protocol` error for non-JSON input,
    /// non-object bodies and ids that are not unsigned integers.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let val: Value = serde_json::from_str(text)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON frame: {e}")))?;
        let Value::Object(mut obj) = val else {
            return Err(TransportError::Protocol("frame is not a JSON object".into()));
        };

        let id = match obj.get("id") {
            None | Some(Value::Null) => {
                let method = obj
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(Self::Notification { method });
            }
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| TransportError::Protocol(format!("unsupported id {n}")))?,
            Some(other) => {
                return Err(TransportError::Protocol(format!("unsupported id {other}")));
            }
        };

        let error = obj.remove("error").filter(|e| !e.is_null());
        let result = obj.remove("result");

        Ok(match (result, error) {
            (Some(_), Some(_)) => Self::Malformed {
                id,
                reason: "response carries both result and error".into(),
            },
            (None, None) => Self::Malformed {
                id,
                reason: "response carries neither result nor error".into(),
            },
            (Some(result), None) => Self::Response { id, outcome: Ok(result) },
            (None, Some(error)) => Self::Response {
                id,
                outcome: Err(JsonRpcError::from_value(error)),
            },
        })
    }
}
