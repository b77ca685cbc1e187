//! External Verifier Process
//!
//! [`PairingProtocol`] implementation that drives a protocol daemon running
//! as a separate process. The daemon owns the radio, key exchange and
//! ranging; this adapter only:
//!
//! - obtains the pairing artifact from the configured [`ArtifactSource`]
//! - spawns `start_command` to begin the session
//! - runs `stop_command`, gives the daemon `stop_grace` to exit on its own,
//!   and kills it only if it is still running
//!
//! Commands run through `sh -c` with the kiosk's permissions.
//!
//! ## Configuration
//!
//! ```toml
//! [verifier]
//! display_name = "PingPongVerifier1234"
//! start_command = "pingpong-verifier serve --name PingPongVerifier1234"
//! stop_command = "pingpong-verifier shutdown"
//!
//! [verifier.artifact]
//! source = "command"
//! command = "pingpong-verifier pairing-code --png"
//! ```

use crate::{PairingArtifact, PairingPayload, PairingProtocol, Result, SessionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Default time a freshly spawned verifier must survive to count as started
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Default time the daemon gets to exit on its own after a successful stop
/// command
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Where the pairing artifact comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Image file written by the verifier
    Path {
        /// Image path (PNG or JPEG)
        path: PathBuf,
    },
    /// Payload rendered locally as a QR code
    Payload(PairingPayload),
    /// Shell command printing a PNG on stdout
    Command {
        /// Command line passed to `sh -c`
        command: String,
    },
}

/// Verifier process settings
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Pairing artifact source
    pub artifact: ArtifactSource,
    /// Command that runs the protocol daemon (long-lived)
    pub start_command: Option<String>,
    /// Command that asks the protocol daemon to end the session
    pub stop_command: Option<String>,
    /// How long the daemon must survive after spawn
    pub startup_grace: Duration,
    /// How long the daemon may take to exit after the stop command succeeded
    pub stop_grace: Duration,
}

/// Protocol collaborator backed by an external verifier process
pub struct VerifierProcess {
    name: String,
    settings: VerifierSettings,
    child: Option<Child>,
    stopped: bool,
}

impl VerifierProcess {
    /// Create an adapter; nothing is spawned until `start_session`
    pub fn new(name: impl Into<String>, settings: VerifierSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            child: None,
            stopped: false,
        }
    }

    /// Check whether a daemon process is currently held
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Process id of the running daemon, if any
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn artifact_from_command(&self, command: &str) -> Result<PairingArtifact> {
        debug!("Requesting pairing artifact via `{}`", command);

        let output = shell(command).output().await.map_err(|e| {
            SessionError::Artifact(format!("failed to run artifact command: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::Artifact(format!(
                "artifact command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        PairingArtifact::from_encoded(&output.stdout)
    }

    async fn run_stop_command(&self, command: &str) -> Result<()> {
        info!("Running verifier stop command");

        let output = shell(command)
            .output()
            .await
            .map_err(|e| SessionError::SessionStop(format!("failed to run stop command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::SessionStop(format!(
                "stop command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// Reap the daemon, waiting up to `grace` for it to exit on its own
    ///
    /// The daemon is killed only if it is still running afterwards.
    async fn reap_child(&mut self, grace: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();

        if !grace.is_zero() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Verifier process {:?} exited with {}", pid, status);
                    return Ok(());
                }
                Ok(Err(e)) => warn!("Failed to wait for verifier process: {}", e),
                Err(_) => warn!(
                    "Verifier process {:?} still running {:?} after stop, killing it",
                    pid, grace
                ),
            }
        } else if let Ok(Some(status)) = child.try_wait() {
            debug!("Verifier process already exited with {}", status);
            return Ok(());
        }

        child.kill().await.map_err(|e| {
            SessionError::SessionStop(format!("failed to kill verifier process: {}", e))
        })?;
        info!("Verifier process {:?} terminated", pid);
        Ok(())
    }
}

#[async_trait]
impl PairingProtocol for VerifierProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce_pairing_artifact(&mut self) -> Result<PairingArtifact> {
        let artifact = match &self.settings.artifact {
            ArtifactSource::Path { path } => PairingArtifact::from_path(path),
            ArtifactSource::Payload(payload) => {
                info!(
                    "Encoding pairing payload for {} (key fingerprint {})",
                    payload.name,
                    payload.fingerprint()
                );
                PairingArtifact::from_payload(payload)
            }
            ArtifactSource::Command { command } => self.artifact_from_command(command).await,
        };

        artifact.map_err(SessionError::into_artifact_error)
    }

    async fn start_session(&mut self) -> Result<()> {
        if self.child.is_some() || self.stopped {
            return Err(SessionError::invalid_state(
                "verifier session already started or stopped",
            ));
        }

        let Some(command) = self.settings.start_command.clone() else {
            info!("No verifier start command configured; session managed externally");
            return Ok(());
        };

        let mut child = shell(&command)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::SessionStart(format!("failed to spawn verifier: {}", e)))?;

        info!("Verifier process started (PID: {:?})", child.id());

        if !self.settings.startup_grace.is_zero() {
            tokio::time::sleep(self.settings.startup_grace).await;
        }

        match child.try_wait() {
            Ok(None) => {
                self.child = Some(child);
                Ok(())
            }
            Ok(Some(status)) if status.success() => {
                info!("Verifier start command completed; session running in background");
                Ok(())
            }
            Ok(Some(status)) => Err(SessionError::SessionStart(format!(
                "verifier exited during startup with {}",
                status
            ))),
            Err(e) => {
                // Keep the handle so stop can still reap it
                self.child = Some(child);
                Err(SessionError::SessionStart(format!(
                    "failed to query verifier status: {}",
                    e
                )))
            }
        }
    }

    async fn stop_session(&mut self) -> Result<()> {
        if self.stopped {
            debug!("Verifier session already stopped");
            return Ok(());
        }
        self.stopped = true;

        // Only a daemon that was asked to stop gets time to exit cleanly
        let (command_result, grace) = match self.settings.stop_command.clone() {
            Some(command) => {
                let result = self.run_stop_command(&command).await;
                let grace = if result.is_ok() {
                    self.settings.stop_grace
                } else {
                    Duration::ZERO
                };
                (result, grace)
            }
            None => (Ok(()), Duration::ZERO),
        };
        if let Err(e) = &command_result {
            warn!("{}", e);
        }

        let reap_result = self.reap_child(grace).await;

        command_result.and(reap_result)
    }
}

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}
