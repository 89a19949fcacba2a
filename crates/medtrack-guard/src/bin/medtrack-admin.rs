//! MedTrack Guard admin CLI
//!
//! Usage:
//!   medtrack-admin suspicious              List devices flagged for review
//!   medtrack-admin unblock <device-id>     Clear a block and reset the ledger
//!   medtrack-admin show <device-id>        Print a device ledger
//!   medtrack-admin stats                   Tracked and blocked device counts
//!   medtrack-admin sample-config           Print the default configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use medtrack_core::{DeviceId, FileKeyValueStore, GuardConfig};
use medtrack_guard::{DeviceTrustService, SqliteStore};

#[derive(Parser)]
#[command(name = "medtrack-admin")]
#[command(about = "Review and unblock devices tracked by the MedTrack guard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path (overrides the config file)
    #[arg(short, long, global = true, env = "MEDTRACK_DB")]
    db: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MEDTRACK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices flagged for review, most recently active first
    Suspicious,

    /// Clear a device block and reset its attempt history
    Unblock {
        /// Device id to unblock
        device_id: String,
    },

    /// Print a device ledger with its block state
    Show {
        /// Device id to look up
        device_id: String,
    },

    /// Print tracked and blocked device counts
    Stats,

    /// Print the default configuration
    SampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Suspicious => {
            let service = open_service(&cli)?;
            let devices = service.get_suspicious_devices().await;
            info!("{} suspicious devices", devices.len());
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Commands::Unblock { device_id } => {
            let service = open_service(&cli)?;
            let device_id = DeviceId::new(device_id.as_str());
            if !service.unblock_device(&device_id).await {
                bail!("failed to unblock device {}", device_id);
            }
            println!("unblocked {}", device_id);
        }
        Commands::Show { device_id } => {
            let service = open_service(&cli)?;
            let device_id = DeviceId::new(device_id.as_str());
            let Some(ledger) = service.get_ledger(&device_id).await? else {
                bail!("no ledger for device {}", device_id);
            };
            let state = service.block_state(&ledger);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "blockState": state, "ledger": ledger }))?
            );
        }
        Commands::Stats => {
            let stats = open_service(&cli)?.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::SampleConfig => print!("{}", GuardConfig::sample()),
    }

    Ok(())
}

fn open_service(cli: &Cli) -> Result<DeviceTrustService> {
    let config = match &cli.config {
        Some(path) => GuardConfig::load_from(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => GuardConfig::load(),
    };

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("Using guard database {:?}", db_path);

    let store = Arc::new(
        SqliteStore::open(&db_path).with_context(|| format!("failed to open {:?}", db_path))?,
    );
    let kv = Arc::new(FileKeyValueStore::new(config.device_id_path()));
    Ok(DeviceTrustService::with_system_clock(store, kv, &config))
}
