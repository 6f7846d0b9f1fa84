//! iwanrpc CLI — query an iWan endpoint from the terminal.
//!
//! Credentials come from `IWAN_APIKEY` / `IWAN_SECRETKEY`, or from a JSON
//! config file passed with `--config`.
//!
//! Usage:
//! ```bash
//! # Connect and measure round-trip latency
//! iwanrpc ping --chain WAN
//!
//! # Send a raw call
//! iwanrpc call --method getBalance --params '{"chainType":"WAN","address":"0x..."}'
//!
//! # Typed helpers
//! iwanrpc balance --chain WAN --address 0x...
//! iwanrpc block-number --chain ETH
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use iwanrpc_api::{ChainType, IwanClient};
use iwanrpc_core::{ClientConfig, RequestOptions, RpcTransport};
use iwanrpc_ws::WsTransport;

use crate::logging::{init_tracing, LogConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let log_config = LogConfig {
        json: args.iter().any(|a| a == "--log-json"),
        ..LogConfig::default()
    };
    init_tracing(&log_config);

    let result = match args[1].as_str() {
        "ping" => cmd_ping(&args[2..]).await,
        "call" => cmd_call(&args[2..]).await,
        "balance" => cmd_balance(&args[2..]).await,
        "block-number" => cmd_block_number(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("iwanrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("iwanrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Query an iWan JSON-RPC endpoint over WebSocket\n");
    println!("USAGE:");
    println!("    iwanrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    ping          Connect and measure latency (getBlockNumber)");
    println!("    call          Send a raw JSON-RPC call");
    println!("    balance       Print the balance of an address");
    println!("    block-number  Print the latest block number");
    println!("    version       Print version");
    println!("    help          Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>      JSON config (default: IWAN_APIKEY / IWAN_SECRETKEY env)");
    println!("    --chain <TYPE>       Chain type, e.g. WAN, ETH, BTC  [default: WAN]");
    println!("    --method <NAME>      Method name (call)");
    println!("    --params <JSON>      Params object (call)  [default: {{}}]");
    println!("    --address <ADDR>     Address (balance)");
    println!("    --timeout-ms <MS>    Per-request timeout");
    println!("    --log-json           Emit logs as JSON on stderr");
}

async fn connect(args: &[String]) -> Result<IwanClient, String> {
    let config = match parse_flag(args, "--config") {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {path}: {e}"))?;
            ClientConfig::from_json_str(&text)
        }
        None => ClientConfig::from_env(),
    }
    .map_err(|e| e.to_string())?;

    let transport = WsTransport::connect(config)
        .await
        .map_err(|e| e.to_string())?;
    tokio::time::timeout(CONNECT_TIMEOUT, transport.wait_until_open())
        .await
        .map_err(|_| format!("could not connect to {} within {CONNECT_TIMEOUT:?}", transport.url()))?
        .map_err(|e| e.to_string())?;
    tracing::debug!(url = %transport.url(), "connected");

    Ok(IwanClient::new(Arc::new(transport)))
}

fn request_options(args: &[String]) -> Result<RequestOptions, String> {
    match parse_flag(args, "--timeout-ms") {
        Some(ms) => {
            let ms: u64 = ms.parse().map_err(|_| format!("invalid --timeout-ms: {ms}"))?;
            Ok(RequestOptions::with_timeout(Duration::from_millis(ms)))
        }
        None => Ok(RequestOptions::default()),
    }
}

fn parse_chain(args: &[String]) -> Result<ChainType, String> {
    parse_flag(args, "--chain")
        .unwrap_or_else(|| "WAN".to_string())
        .parse()
}

async fn cmd_ping(args: &[String]) -> Result<(), String> {
    let chain = parse_chain(args)?;
    let client = connect(args).await?;

    println!("Testing {}...", client.transport().url());

    let start = Instant::now();
    let block = client
        .get_block_number(chain)
        .await
        .map_err(|e| e.to_string())?;
    let latency = start.elapsed();

    println!("  Status:       OK");
    println!("  Chain:        {chain}");
    println!("  Block number: {block}");
    println!("  Latency:      {}ms", latency.as_millis());
    println!("  Health:       {}", client.health());

    client.close().await;
    Ok(())
}

async fn cmd_call(args: &[String]) -> Result<(), String> {
    let method = parse_flag(args, "--method").ok_or("--method is required")?;
    let params: serde_json::Value = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("invalid --params: {e}"))?,
        None => serde_json::json!({}),
    };
    let options = request_options(args)?;

    let client = connect(args).await?;
    let result: serde_json::Value = client
        .call_with(&method, params, options)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    client.close().await;
    Ok(())
}

async fn cmd_balance(args: &[String]) -> Result<(), String> {
    let chain = parse_chain(args)?;
    let address = parse_flag(args, "--address").ok_or("--address is required")?;

    let client = connect(args).await?;
    let balance = client
        .get_balance(chain, &address)
        .await
        .map_err(|e| e.to_string())?;

    println!("{balance}");
    client.close().await;
    Ok(())
}

async fn cmd_block_number(args: &[String]) -> Result<(), String> {
    let chain = parse_chain(args)?;

    let client = connect(args).await?;
    let block = client
        .get_block_number(chain)
        .await
        .map_err(|e| e.to_string())?;

    println!("{block}");
    client.close().await;
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
