// src/main.rs

//! `gatewire`: a connectivity probe. Sends one command to a configured
//! endpoint and prints the backend's status.

use anyhow::{Context, Result, anyhow};
use gatewire::WireMessage;
use gatewire::config::Config;
use gatewire::core::metrics;
use gatewire::gateway::{BackendStatus, CallRequest, GatewayContext};
use std::env;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str =
    "Usage: gatewire [--config gatewire.toml] [--endpoint NAME] [--command ECHO] [--metrics] [--version]";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("gatewire version {VERSION}");
        return Ok(());
    }
    if args.contains(&"--help".to_string()) {
        println!("{USAGE}");
        return Ok(());
    }

    let flag = |name: &str| {
        args.iter()
            .position(|arg| arg == name)
            .map(|i| args.get(i + 1).map(|s| s.as_str()))
    };

    let config_path = match flag("--config") {
        Some(Some(path)) => path,
        Some(None) => {
            eprintln!("--config flag requires a value");
            std::process::exit(1);
        }
        None => "gatewire.toml",
    };

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let endpoint_name = match flag("--endpoint") {
        Some(Some(name)) => name.to_string(),
        Some(None) => return Err(anyhow!("--endpoint flag requires a value")),
        None => match config.endpoints.keys().next() {
            Some(name) if config.endpoints.len() == 1 => name.clone(),
            _ => {
                return Err(anyhow!(
                    "{USAGE}\n--endpoint is required unless exactly one endpoint is configured"
                ));
            }
        },
    };
    let command = match flag("--command") {
        Some(Some(command)) => command.to_string(),
        Some(None) => return Err(anyhow!("--command flag requires a value")),
        None => "ECHO".to_string(),
    };

    let gateway = GatewayContext::start(config);
    let address = gateway
        .endpoint(&endpoint_name)
        .with_context(|| format!("Cannot resolve endpoint '{endpoint_name}'"))?;
    let message = WireMessage::with_command(command.as_str());

    info!("Probing {} ({}) with {}", endpoint_name, address, command);
    let started = Instant::now();
    let result = gateway.call(CallRequest::new(address, message)).await;
    let elapsed = started.elapsed();

    if args.contains(&"--metrics".to_string()) {
        print!("{}", metrics::gather_metrics());
    }

    match result {
        Ok(outcome) => {
            match &outcome.status {
                BackendStatus::Ok => println!("OK in {elapsed:?}"),
                BackendStatus::PermissionDenied(msg) => println!("DENIED in {elapsed:?}: {msg}"),
                BackendStatus::Failure(msg) => println!("FAIL in {elapsed:?}: {msg}"),
            }
            Ok(())
        }
        Err(e) => {
            error!("Probe of '{}' failed: {}", endpoint_name, e);
            Err(e.into())
        }
    }
}
