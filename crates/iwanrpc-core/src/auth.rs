//! Request signing.
//!
//! A [`Signer`] turns an unsigned [`JsonRpcRequest`] into a [`SignedEnvelope`]
//! whose text is exactly what goes on the wire. Signing never touches the
//! network; a failure here means the request is never sent.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, RpcId};

/// A request that has been signed and serialized. Immutable.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    id: RpcId,
    method: String,
    body: String,
}

impl SignedEnvelope {
    pub fn id(&self) -> RpcId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The serialized JSON text to transmit.
    pub fn as_str(&self) -> &str {
        &self.body
    }
}

/// Produces signed envelopes from unsigned requests.
pub trait Signer: Send + Sync + 'static {
    fn sign(&self, req: JsonRpcRequest) -> Result<SignedEnvelope, TransportError>;
}

/// iWan HMAC-SHA256 signer.
///
/// Appends `params.timestamp` (ms since the Unix epoch), signs the compact
/// JSON of the whole envelope and stores the base64 digest as
/// `params.signature`.
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn digest(&self, body: &str) -> Result<String, TransportError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        mac.update(body.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").field("secret", &"***").finish()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, mut req: JsonRpcRequest) -> Result<SignedEnvelope, TransportError> {
        if self.secret.is_empty() {
            return Err(TransportError::Authentication("secret key is empty".into()));
        }
        if req.params.is_null() {
            req.params = Value::Object(Default::default());
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TransportError::Authentication(format!("system clock error: {e}")))?
            .as_millis() as u64;

        let Value::Object(params) = &mut req.params else {
            return Err(TransportError::Authentication(format!(
                "params for '{}' must be a JSON object",
                req.method
            )));
        };
        params.insert("timestamp".into(), Value::from(timestamp));

        let unsigned = serde_json::to_string(&req)
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        let signature = self.digest(&unsigned)?;

        if let Value::Object(params) = &mut req.params {
            params.insert("signature".into(), Value::String(signature));
        }
        let body = serde_json::to_string(&req)
            .map_err(|e| TransportError::Authentication(e.to_string()))?;
        tracing::trace!(id = req.id, method = %req.method, timestamp, "request signed");

        Ok(SignedEnvelope {
            id: req.id,
            method: req.method,
            body,
        })
    }
}
