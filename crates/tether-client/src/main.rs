//! tether command line client
//!
//! Bridges stdin/stdout to a resilient WebSocket connection. Each stdin line
//! is sent as a text payload (queued while the link is down); incoming
//! payloads are printed to stdout. Lines starting with `:` are commands:
//! `:status`, `:stats`, `:history`, `:reconnect`, `:quit`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_client::{ConnectionEvent, ResilientConnection};
use tether_core::config::{self, ConnectionConfig};
use tether_core::{time, ErrorKind, Payload};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Resilient WebSocket client that survives network drops")]
#[command(version)]
struct Args {
    /// WebSocket URL to connect to (ws:// or wss://)
    url: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before the first reconnect, in milliseconds
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Cap on the reconnect delay, in milliseconds
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Timeout for a single connection attempt, in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "TETHER_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = build_config(&args)?;
    tracing::debug!("Using configuration: {:?}", config);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connection = ResilientConnection::websocket(args.url.clone(), config, event_tx)
        .context("Invalid connection configuration")?;

    tracing::info!("Connecting to {}", args.url);
    if let Err(e) = connection.connect().await {
        tracing::warn!("Initial connection failed: {}. Retrying in background", e);
    }

    run_event_loop(&connection, event_rx).await;

    connection.close();
    Ok(())
}

/// Load the config file, then apply command-line overrides
fn build_config(args: &Args) -> Result<ConnectionConfig> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_connection_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else if args.config.is_some() {
        anyhow::bail!("Config file not found: {:?}", config_path);
    } else {
        ConnectionConfig::default()
    };

    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(ms) = args.initial_delay_ms {
        config.backoff.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = args.max_delay_ms {
        config.backoff.max_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = args.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Pump stdin into the connection and connection events to the terminal
async fn run_event_loop(
    connection: &ResilientConnection,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(connection, line) {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed, shutting down");
                        return;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        return;
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else { return };
                report_event(event);
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing connection");
                return;
            }
        }
    }
}

/// Handle one stdin line; returns false when the client should exit
fn handle_line(connection: &ResilientConnection, line: String) -> bool {
    match line.trim() {
        ":quit" => return false,
        ":status" => match serde_json::to_string_pretty(&connection.status()) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to render status: {}", e),
        },
        ":stats" => println!("{}", connection.statistics()),
        ":history" => {
            for record in connection.history(20) {
                let from = record
                    .from
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>8}ms ago  {} -> {} {}",
                    time::elapsed_millis(record.timestamp),
                    from,
                    record.to,
                    record.metadata.reason.unwrap_or_default()
                );
            }
        }
        ":reconnect" => connection.force_reconnect(),
        _ => connection.send(line),
    }
    true
}

fn report_event(event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => tracing::info!("Connected"),
        ConnectionEvent::Disconnected { reason } => tracing::warn!("Disconnected: {}", reason),
        ConnectionEvent::Reconnecting(e) => tracing::info!(
            "Reconnect attempt {}/{} in {:?}",
            e.attempt_number,
            e.max_attempts,
            e.next_delay
        ),
        ConnectionEvent::Error(e) if e.kind == ErrorKind::MaxAttemptsExceeded => {
            tracing::error!("{}. Type :reconnect to try again", e.reason)
        }
        ConnectionEvent::Error(e) => tracing::warn!("{} error: {}", e.kind, e.reason),
        ConnectionEvent::Message(Payload::Text(text)) => println!("{}", text),
        ConnectionEvent::Message(Payload::Binary(data)) => {
            println!("<{} bytes of binary data>", data.len())
        }
    }
}
