//! Command Line and Logging
//!
//! CLI definition, logging setup and the diagnostic subcommands. Diagnostic
//! subcommands never open a window and never start a session.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smartlock_session::{PairingProtocol, VerifierProcess};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

/// Smartlock kiosk command-line interface
#[derive(Parser, Debug)]
#[command(name = "smartlock-kiosk")]
#[command(about = "Full-screen pairing code kiosk for the Smartlock verifier", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to <config_dir>/smartlock/kiosk.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub timestamps: bool,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// Diagnostic commands for troubleshooting
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show kiosk version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },

    /// Print the effective configuration as TOML
    DumpConfig,

    /// Produce the pairing artifact and write it as PNG
    RenderArtifact {
        /// Output file path
        #[arg(short, long, value_name = "PNG")]
        output: PathBuf,
    },
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Run a diagnostic subcommand to completion
pub async fn handle_diagnostic_command(command: &DiagnosticCommand, config: &Config) -> Result<()> {
    match command {
        DiagnosticCommand::Version { verbose } => {
            println!("smartlock-kiosk {}", env!("CARGO_PKG_VERSION"));
            if *verbose {
                println!("  target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
                println!("  verifier: {}", config.verifier.display_name);
            }
        }
        DiagnosticCommand::DumpConfig => {
            print!("{}", config.to_toml()?);
        }
        DiagnosticCommand::RenderArtifact { output } => {
            let mut verifier =
                VerifierProcess::new(config.verifier.display_name.clone(), config.verifier_settings());
            let artifact = verifier
                .produce_pairing_artifact()
                .await
                .context("Failed to produce pairing artifact")?;
            let png = artifact.to_png().context("Failed to encode pairing artifact")?;
            fs::write(output, png)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            let (width, height) = artifact.dimensions();
            println!("Wrote {}x{} pairing artifact to {}", width, height, output.display());
        }
    }

    Ok(())
}
