//! Log setup for the `iwanrpc` binary.
//!
//! Command results are printed on stdout; every log line goes to stderr so
//! `iwanrpc call ... | jq` keeps working. The transport crates log connection
//! lifecycle at `info`, so the default filter is `warn` to keep one-shot
//! commands quiet. `RUST_LOG` overrides it, e.g.
//! `RUST_LOG=iwanrpc_ws=debug iwanrpc ping`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default directive when `RUST_LOG` is unset: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// One JSON object per line (`--log-json`), for shipping CLI runs to a log store
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Install the global subscriber. Call once, before any transport is built.
///
/// An unparseable `level` falls back to `warn` rather than failing the command.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // logs go to stderr so command output stays pipeable
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
