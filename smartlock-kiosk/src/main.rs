//! Smartlock kiosk
//!
//! Shows the verifier's pairing code full-screen while the pairing session
//! runs, and stops the session on Escape, window close, Ctrl-C or SIGTERM.

mod config;
mod diagnostics;
mod window;

use anyhow::{Context, Result};
use clap::Parser;
use smartlock_session::{SessionBridge, SessionError, VerifierProcess};
use std::process::ExitCode;
use tracing::{error, info, warn};

use config::Config;
use diagnostics::{handle_diagnostic_command, Cli};
use window::WindowSurface;

/// Termination signals, registered before the session starts
///
/// Signals delivered while the artifact is produced or the window opens are
/// queued by the installed handlers and observed by the bridge.
struct Termination {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl Termination {
    #[cfg(unix)]
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    #[cfg(windows)]
    fn install() -> Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c().context("Failed to install Ctrl-C handler")?,
        })
    }

    /// Completes on the first termination signal
    async fn wait(mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => info!("Received Ctrl-C"),
                _ = self.terminate.recv() => info!("Received SIGTERM"),
            }
        }

        #[cfg(windows)]
        {
            self.ctrl_c.recv().await;
            info!("Received Ctrl-C");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Diagnostic commands never open a window or start a session
    if let Some(command) = &cli.command {
        let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
        handle_diagnostic_command(command, &config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting Smartlock kiosk...");

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let e = SessionError::Configuration(format!("{:#}", e));
            error!("{}", e.user_message());
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    info!("Configuration loaded");
    info!("Verifier: {}", config.verifier.display_name);
    info!("Tick interval: {} ms", config.session.tick_interval_ms);

    let termination = Termination::install().context("Failed to install signal handlers")?;

    let mut verifier =
        VerifierProcess::new(config.verifier.display_name.clone(), config.verifier_settings());
    let bridge = SessionBridge::new(config.session.bridge_config());

    let report = bridge
        .run(
            &mut verifier,
            |artifact| WindowSurface::create_and_show(artifact, &config.display),
            termination.wait(),
        )
        .await;

    match report.stop.as_ref().map(|stop| (stop, stop.error())) {
        Some((_, Some(e))) => warn!("{}", e.user_message()),
        Some(_) => info!("Pairing session stopped"),
        None => info!("Pairing session was never started"),
    }

    match &report.outcome {
        Ok(reason) => info!(
            "Kiosk exiting after {} iterations: {:?}",
            report.iterations, reason
        ),
        Err(e) if e.is_fatal_before_session() => {
            error!("Kiosk could not start the pairing session: {}", e.user_message())
        }
        Err(e) => error!("Kiosk exiting: {}", e.user_message()),
    }

    Ok(ExitCode::from(report.exit_code()))
}
