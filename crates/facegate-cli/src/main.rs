//! facegate: calibration and configuration inspection tool.
//!
//! Companion CLI for the daemon: inspect or clear the persisted calibration
//! window for a device/identity pair, and print the stock engine defaults.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sha2::{Digest, Sha256};

use facegate_core::{CalibrationKey, CalibrationStore, EngineConfig};
use facegate_store::SqliteCalibrationStore;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate calibration tooling", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or clear persisted calibration windows.
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },
    /// Print the stock engine configuration as JSON.
    Defaults,
}

#[derive(Subcommand)]
enum CalibrationAction {
    /// Show the stored window for a device/identity pair, if any.
    Show(KeyArgs),
    /// Delete the stored window, forcing a fresh calibration run.
    Clear(KeyArgs),
}

#[derive(Args)]
struct KeyArgs {
    /// Path to the calibration database.
    #[arg(long)]
    db: PathBuf,
    /// Stable device identifier.
    #[arg(long, default_value = "default")]
    device_id: String,
    /// Video height in pixels.
    #[arg(long, default_value_t = 720)]
    video_height: u32,
    /// User identity string (hashed before lookup).
    #[arg(long, default_value = "anonymous")]
    identity: String,
}

impl KeyArgs {
    fn key(&self) -> CalibrationKey {
        let mut hasher = Sha256::new();
        hasher.update(self.identity.as_bytes());
        CalibrationKey {
            device_id: self.device_id.clone(),
            video_height: self.video_height,
            identity_hash: format!("{:x}", hasher.finalize()),
        }
    }

    fn open_store(&self) -> anyhow::Result<SqliteCalibrationStore> {
        SqliteCalibrationStore::open(&self.db)
            .with_context(|| format!("opening calibration store at {}", self.db.display()))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Calibration { action } => match action {
            CalibrationAction::Show(args) => {
                let store = args.open_store()?;
                match store
                    .load(&args.key())
                    .map_err(|e| anyhow::anyhow!("{e}"))?
                {
                    Some(window) => println!("{}", serde_json::to_string_pretty(&window)?),
                    None => println!("no calibration window stored"),
                }
            }
            CalibrationAction::Clear(args) => {
                let store = args.open_store()?;
                if store.delete(&args.key())? {
                    println!("calibration window cleared");
                } else {
                    println!("no calibration window stored");
                }
            }
        },
        Command::Defaults => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
        }
    }
    Ok(())
}
