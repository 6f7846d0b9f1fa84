//! Client configuration.
//!
//! One explicit value per client instance. Credentials are mandatory and
//! checked by [`ClientConfig::validate`], which every transport constructor
//! calls before doing anything else.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub const ENV_API_KEY: &str = "IWAN_APIKEY";
pub const ENV_SECRET_KEY: &str = "IWAN_SECRETKEY";
pub const ENV_HOST: &str = "IWAN_HOST";
pub const ENV_PORT: &str = "IWAN_PORT";

/// Connection and timing settings for an iWan client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `wss` when true, plain `ws` otherwise.
    #[serde(default = "bool_true")]
    pub secure: bool,
    /// Transport flag path segment.
    #[serde(default = "default_flag")]
    pub flag: String,
    /// API version path segment.
    #[serde(default = "default_version")]
    pub version: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Consecutive unanswered heartbeats before the connection is declared dead.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,
    /// Fixed delay between a disconnect and the next connect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Period of the request timeout sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Upper bound on one connect attempt, TCP through the WebSocket upgrade.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_host() -> String { "api.wanchain.org".into() }
fn default_port() -> u16 { 8443 }
fn default_flag() -> String { "ws".into() }
fn default_version() -> String { "v3".into() }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_heartbeat_interval_ms() -> u64 { 10_000 }
fn default_max_missed_heartbeats() -> u32 { 3 }
fn default_reconnect_delay_ms() -> u64 { 2_000 }
fn default_sweep_interval_ms() -> u64 { 1_000 }
fn default_handshake_timeout_ms() -> u64 { 10_000 }
fn bool_true() -> bool { true }

impl ClientConfig {
    /// Default endpoint and timings with the given credentials.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: true,
            flag: default_flag(),
            version: default_version(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    /// Read credentials (and optionally host/port) from the environment.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransportError> {
        let api_key = lookup(ENV_API_KEY)
            .ok_or_else(|| TransportError::Config(format!("{ENV_API_KEY} is not set")))?;
        let secret_key = lookup(ENV_SECRET_KEY)
            .ok_or_else(|| TransportError::Config(format!("{ENV_SECRET_KEY} is not set")))?;
        let mut config = Self::new(api_key, secret_key);
        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.port = port
                .parse()
                .map_err(|_| TransportError::Config(format!("{ENV_PORT} is not a port: {port}")))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, TransportError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TransportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs a transport cannot run with.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.api_key.trim().is_empty() {
            return Err(TransportError::Config("api_key is required".into()));
        }
        if self.secret_key.trim().is_empty() {
            return Err(TransportError::Config("secret_key is required".into()));
        }
        if self.host.is_empty() {
            return Err(TransportError::Config("host is required".into()));
        }
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
        ] {
            if value == 0 {
                return Err(TransportError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.max_missed_heartbeats == 0 {
            return Err(TransportError::Config("max_missed_heartbeats must be non-zero".into()));
        }
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// `wss://{host}:{port}/{flag}/{version}/{api_key}`
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}/{}",
            self.scheme(),
            self.host,
            self.port,
            self.flag,
            self.version,
            self.api_key
        )
    }

    /// The URL with the API key masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}/***",
            self.scheme(),
            self.host,
            self.port,
            self.flag,
            self.version
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16, secure: bool) -> Self {
        self.host = host.into();
        self.port = port;
        self.secure = secure;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, max_missed: u32) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self.max_missed_heartbeats = max_missed;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.redacted_url())
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("max_missed_heartbeats", &self.max_missed_heartbeats)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("sweep_interval_ms", &self.sweep_interval_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .finish_non_exhaustive()
    }
}
