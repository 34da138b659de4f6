use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use log::{error, info};

mod config;
mod crc;
mod error;
mod frame;
mod manager;
mod messages;
mod registry;
mod transport;
mod trigger;
mod varint;

/// Exit code for every abnormal termination, including bad arguments.
const FAILURE_EXIT_CODE: u8 = 99;

#[derive(Parser, Debug)]
#[command(name = "meshhub", version, about = "Smart-home mesh hub polling over HTTP")]
struct Cli {
    /// Server URL; an empty string selects http://localhost:9998
    url: String,

    /// This hub's mesh address, in hex
    #[arg(value_parser = parse_hex_address)]
    hub_address: u64,

    /// Optional TOML file with hub and transport settings
    #[arg(long, short)]
    config: Option<PathBuf>,
}

fn parse_hex_address(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}

async fn run(cli: Cli) -> anyhow::Result<manager::Outcome> {
    let config = match &cli.config {
        Some(path) => config::AppConfig::load(path)?,
        None => config::AppConfig::default(),
    };

    let settings = config::HubSettings::new(cli.hub_address, &config);
    info!(
        "Hub {} at {:#x}, liveness window {}",
        settings.name, settings.address, settings.liveness_window
    );

    let transport = transport::HttpTransport::new(
        &cli.url,
        &config.transport.clone().unwrap_or_default(),
    )
    .context("building HTTP client")?;

    let mut core = manager::Manager::new(transport, settings);
    let outcome = core.run_loop().await;
    info!("{} device(s) known at exit", core.registry().len());
    Ok(outcome?)
}

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(FAILURE_EXIT_CODE),
            };
        }
    };

    match run(cli).await {
        Ok(manager::Outcome::Success) => ExitCode::SUCCESS,
        Ok(manager::Outcome::Failure) => ExitCode::from(FAILURE_EXIT_CODE),
        Err(err) => {
            match err.downcast_ref::<error::HubError>() {
                Some(error::HubError::Protocol(e)) if e.is_integrity() => {
                    error!("Corrupted frame from the mesh, stopping: {e}")
                }
                _ => error!("{err:#}"),
            }
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}
