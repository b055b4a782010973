//! CLI Entry Point for sensortag-daq
//!
//! Provides command-line interface for:
//! - Running the acquisition pipeline until Ctrl-C
//! - Validating a configuration file without touching hardware
//! - Summarizing an existing CSV log
//!
//! # Usage
//!
//! Run the pipeline:
//! ```bash
//! sensortag-daq run --config config/sensortag.toml
//! ```
//!
//! Inspect a log:
//! ```bash
//! sensortag-daq inspect lux.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensortag_daq::clock::SystemClock;
use sensortag_daq::config::{DaqConfig, DriverKind, DEFAULT_CONFIG_PATH};
use sensortag_daq::coordinator::Coordinator;
use sensortag_daq::data::storage::CsvLog;
use sensortag_daq::hardware::SimulatedDriver;
use sensortag_daq::logging;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sensortag-daq")]
#[command(about = "Grid-aligned light-intensity logging from a fleet of sensor tags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start acquisition and persistence; stop with Ctrl-C
    Run {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Load and validate a configuration, then print the effective settings
    CheckConfig {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print per-label row counts and time span of a CSV log
    Inspect {
        /// Path to the CSV log
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_pipeline(config).await,
        Commands::CheckConfig { config } => check_config(config),
        Commands::Inspect { csv } => inspect_log(csv),
    }
}

fn load_config(path: &Path) -> Result<DaqConfig> {
    let config = DaqConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run_pipeline(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    info!(
        name = %config.application.name,
        config = %config_path.display(),
        output = %config.storage.output_path.display(),
        "Starting sensortag-daq"
    );

    let driver = match config.driver.kind {
        DriverKind::Simulated => Arc::new(SimulatedDriver::from_config(&config.driver)),
    };
    let coordinator = Coordinator::new(config, driver, Arc::new(SystemClock));
    let mut pipeline = coordinator.start().await?;
    info!("Pipeline running - press Ctrl+C to stop");

    let mut persistence_error = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
        }
        outcome = pipeline.wait_writer() => {
            // The writer only returns on its own after exhausting its retry budget.
            if let Err(err) = outcome {
                error!(error = %err, "Persistence stopped; sampling continues until Ctrl+C");
                persistence_error = Some(err);
            }
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        }
    }

    info!(health = ?pipeline.health(), "Shutdown requested");
    pipeline.shutdown().await?;
    if let Some(err) = persistence_error {
        return Err(err.into());
    }

    info!("sensortag-daq stopped");
    Ok(())
}

fn check_config(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    println!("✅ Configuration OK: {}", config_path.display());
    println!("   Devices:");
    for device in &config.devices {
        println!("     - {} ({})", device.label, device.address);
    }
    let channels: Vec<String> = config.channels.iter().map(ToString::to_string).collect();
    println!("   Channels: {}", channels.join(", "));
    println!(
        "   Sampling: every {:?}, settle {:?}",
        config.timing.sampling_period, config.timing.settle_delay
    );
    println!(
        "   Output: {} (schema policy: {:?}, flush every {:?})",
        config.storage.output_path.display(),
        config.storage.schema_policy,
        config.timing.writer_interval
    );
    Ok(())
}

#[derive(Default)]
struct LabelSummary {
    rows: usize,
    first: Option<i64>,
    last: Option<i64>,
}

fn inspect_log(path: PathBuf) -> Result<()> {
    let (schema, readings) = CsvLog::read_all(&path)
        .with_context(|| format!("Failed to read log {}", path.display()))?;

    let mut summary: BTreeMap<&str, LabelSummary> = BTreeMap::new();
    for reading in &readings {
        let entry = summary.entry(reading.label.as_str()).or_default();
        entry.rows += 1;
        entry.first = Some(entry.first.map_or(reading.timestamp, |t| t.min(reading.timestamp)));
        entry.last = Some(entry.last.map_or(reading.timestamp, |t| t.max(reading.timestamp)));
    }

    println!("📄 {}", path.display());
    println!("   Columns: {}", schema.columns().join(","));
    println!("   Rows: {}", readings.len());
    for (label, entry) in &summary {
        match (entry.first, entry.last) {
            (Some(first), Some(last)) => println!(
                "     {:<12} {:>8} rows  {} .. {} ({}s)",
                label,
                entry.rows,
                first,
                last,
                last - first
            ),
            _ => println!("     {:<12} {:>8} rows", label, entry.rows),
        }
    }
    Ok(())
}
