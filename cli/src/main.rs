//! batchrpc CLI: send batched JSON-RPC calls and watch upstream health.
//!
//! Usage:
//! ```bash
//! # Check an endpoint (sync state, peers, height, latency)
//! batchrpc test --url http://localhost:8545
//!
//! # Send one call
//! batchrpc call --url http://localhost:8545 eth_getBalance --params '["0x0000000000000000000000000000000000000000", "latest"]'
//!
//! # Send several parameterless calls as one batch
//! batchrpc batch --url http://localhost:8545 eth_blockNumber eth_chainId net_version
//!
//! # Round-robin over several nodes with periodic health checks
//! batchrpc watch --url http://a:8545 --url http://b:8545 --period 10
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use batchrpc_core::health::{BasicUpstreamValidator, UpstreamValidator};
use batchrpc_core::{
    commands, Batch, Call, FailoverConfig, RpcClient, RpcClientExt, RpcError, RpcParam,
};
use batchrpc_http::{HttpClientConfig, TransportStrategy};

#[derive(Parser)]
#[command(name = "batchrpc", version)]
#[command(about = "Batched JSON-RPC client for Ethereum-style nodes", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check an endpoint: sync state, peer count, height and latency
    Test {
        #[command(flatten)]
        http: HttpArgs,

        #[arg(long, help = "Minimum peer count to report the node as usable", default_value_t = 3)]
        min_peers: u64,
    },
    /// Send a single call and print its result
    Call {
        #[command(flatten)]
        http: HttpArgs,

        #[arg(help = "JSON-RPC method name")]
        method: String,

        #[arg(long, help = "Parameters as a JSON array", default_value = "[]")]
        params: String,
    },
    /// Send several parameterless calls as one batch
    Batch {
        #[command(flatten)]
        http: HttpArgs,

        #[arg(required = true, help = "JSON-RPC method names")]
        methods: Vec<String>,
    },
    /// Poll the block height through a failover client until Ctrl-C
    Watch {
        #[arg(long = "url", required = true, help = "Upstream endpoint URL (repeatable)")]
        urls: Vec<String>,

        #[arg(long, help = "Transport strategy", default_value_t = TransportStrategy::Aggregated)]
        strategy: TransportStrategy,

        #[arg(long, help = "Seconds between health checks", default_value_t = 30)]
        period: u64,

        #[arg(long, help = "Minimum peer count for an upstream to be usable", default_value_t = 3)]
        min_peers: u64,

        #[arg(long, help = "Seconds between block-height polls", default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Args)]
struct HttpArgs {
    #[arg(long, help = "RPC endpoint URL")]
    url: String,

    #[arg(long, help = "Transport strategy", default_value_t = TransportStrategy::Aggregated)]
    strategy: TransportStrategy,

    #[arg(long, help = "Request timeout in seconds", default_value_t = 30)]
    timeout: u64,
}

impl HttpArgs {
    fn config(&self) -> HttpClientConfig {
        HttpClientConfig {
            strategy: self.strategy,
            request_timeout: Duration::from_secs(self.timeout),
            ..HttpClientConfig::default()
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Test { http, min_peers } => cmd_test(&http, min_peers).await,
        Command::Call { http, method, params } => cmd_call(&http, &method, &params).await,
        Command::Batch { http, methods } => cmd_batch(&http, &methods).await,
        Command::Watch {
            urls,
            strategy,
            period,
            min_peers,
            interval,
        } => cmd_watch(urls, strategy, period, min_peers, interval).await,
    }
}

async fn cmd_test(http: &HttpArgs, min_peers: u64) -> Result<()> {
    let client = batchrpc_http::connect(&http.url, &http.config())?;
    println!("Testing {} ({})...", http.url, http.strategy);

    let mut batch = Batch::new();
    let syncing = batch.add(commands::eth_syncing());
    let peers = batch.add(commands::net_peer_count());
    let height = batch.add(commands::eth_block_number());
    let version = batch.add(commands::web3_client_version());

    let start = Instant::now();
    client
        .execute(batch)
        .await
        .with_context(|| format!("batch to {} failed", http.url))?;
    let latency = start.elapsed();

    println!("  Client:       {}", show(version.result().await));
    println!("  Block number: {}", show(height.result().await));
    println!("  Peers:        {}", show(peers.result().await));
    println!("  Syncing:      {}", show(syncing.result().await.map(|s| s.is_syncing())));
    println!("  Latency:      {}ms", latency.as_millis());

    let validator = BasicUpstreamValidator::new(min_peers, Duration::from_secs(3));
    let usable = validator.validate(&client).await;
    println!("  Usable:       {usable} (min peers {min_peers})");
    Ok(())
}

async fn cmd_call(http: &HttpArgs, method: &str, params: &str) -> Result<()> {
    let params: Vec<RpcParam> =
        serde_json::from_str(params).context("--params must be a JSON array")?;
    let client = batchrpc_http::connect(&http.url, &http.config())?;

    let result = client.call(Call::new(method, params)?).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_batch(http: &HttpArgs, methods: &[String]) -> Result<()> {
    let client = batchrpc_http::connect(&http.url, &http.config())?;
    let calls = methods
        .iter()
        .map(|m| Call::new(m, vec![]))
        .collect::<Result<Vec<_>, _>>()?;

    let outcomes = client.call_batch(calls).await?;
    for (method, outcome) in methods.iter().zip(outcomes) {
        match outcome {
            Ok(value) => println!("{method}: {value}"),
            Err(e) => println!("{method}: error {} ({})", e.code(), e.message()),
        }
    }
    Ok(())
}

async fn cmd_watch(
    urls: Vec<String>,
    strategy: TransportStrategy,
    period: u64,
    min_peers: u64,
    interval: u64,
) -> Result<()> {
    if interval == 0 {
        bail!("--interval must be at least 1 second");
    }
    let http = HttpClientConfig {
        strategy,
        ..HttpClientConfig::default()
    };
    let config = FailoverConfig {
        min_peers,
        health_check_period: Duration::from_secs(period),
        ..FailoverConfig::default()
    };
    let client = Arc::new(batchrpc_http::failover(&urls, &http, config)?);
    let checks = client.start_configured_health_checking()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        let outcome = tokio::select! {
            _ = &mut shutdown => break,
            outcome = client.call(commands::eth_block_number()) => outcome,
        };
        match outcome {
            Ok(height) => tracing::info!(height, "block"),
            Err(RpcError::NoUpstreamAvailable) => {
                let summary: Vec<String> = client
                    .health_summary()
                    .into_iter()
                    .map(|(url, status)| format!("{url}={status}"))
                    .collect();
                tracing::warn!(upstreams = %summary.join(", "), "no usable upstream");
            }
            Err(e) => tracing::warn!(error = %e, "block poll failed"),
        }
    }

    checks.stop().await;
    Ok(())
}

fn show<T: std::fmt::Display>(outcome: Result<T, RpcError>) -> String {
    match outcome {
        Ok(value) => value.to_string(),
        Err(e) => format!("error {} ({})", e.code(), e.message()),
    }
}
