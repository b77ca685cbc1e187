//! Single-shot session guard
//!
//! Wraps the protocol collaborator so `start_session` and `stop_session` are
//! each issued at most once, and a stop is owed exactly when a start was
//! attempted (successful or not).
//!
//! Rust has no async `Drop`, so the guard cannot stop the session on its own
//! when dropped. The bridge calls [`SessionGuard::stop`] from its one cleanup
//! region; the guard's `Drop` only reports a skipped stop, which can happen
//! when the whole run future is dropped (e.g. the runtime shuts down).

use crate::{PairingProtocol, Result, SessionError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of the best-effort stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Session ended cleanly
    Stopped,
    /// The collaborator reported a failure (logged, not retried)
    Failed(String),
    /// The collaborator did not finish within the stop timeout
    TimedOut(Duration),
}

impl StopOutcome {
    /// Check whether the stop completed cleanly
    pub fn is_clean(&self) -> bool {
        matches!(self, StopOutcome::Stopped)
    }

    /// The stop failure as an error, if there was one
    pub fn error(&self) -> Option<SessionError> {
        match self {
            StopOutcome::Stopped => None,
            StopOutcome::Failed(reason) => Some(SessionError::SessionStop(reason.clone())),
            StopOutcome::TimedOut(after) => Some(SessionError::StopTimeout(*after)),
        }
    }
}

/// Tracks start/stop for one protocol session
pub struct SessionGuard<'a, P: PairingProtocol + ?Sized> {
    protocol: &'a mut P,
    stop_timeout: Duration,
    start_attempted: bool,
    stop_issued: bool,
}

impl<'a, P: PairingProtocol + ?Sized> SessionGuard<'a, P> {
    /// Guard a protocol; nothing is called yet
    pub fn new(protocol: &'a mut P, stop_timeout: Duration) -> Self {
        Self {
            protocol,
            stop_timeout,
            start_attempted: false,
            stop_issued: false,
        }
    }

    /// Whether `start_session` has been attempted
    pub fn start_attempted(&self) -> bool {
        self.start_attempted
    }

    /// Whether `stop_session` has been issued
    pub fn stop_issued(&self) -> bool {
        self.stop_issued
    }

    /// Start the session
    ///
    /// Marks the start as attempted before awaiting, so a failed or partial
    /// start still owes a stop.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionStart` wrapping the collaborator's failure, or
    /// `InvalidState` if a start was already attempted.
    pub async fn start(&mut self) -> Result<()> {
        if self.start_attempted {
            return Err(SessionError::invalid_state("session start already attempted"));
        }
        self.start_attempted = true;

        info!("Starting {} session", self.protocol.name());
        self.protocol.start_session().await.map_err(|e| match e {
            SessionError::SessionStart(_) => e,
            other => SessionError::SessionStart(other.to_string()),
        })
    }

    /// Stop the session, at most once
    ///
    /// Returns `None` when no stop is owed (start never attempted) or the stop
    /// was already issued; otherwise the outcome of the single stop call.
    pub async fn stop(&mut self) -> Option<StopOutcome> {
        if !self.start_attempted {
            debug!("Session never started, no stop owed");
            return None;
        }
        if self.stop_issued {
            debug!("Session stop already issued");
            return None;
        }
        self.stop_issued = true;

        info!("Stopping {} session", self.protocol.name());
        let outcome = match tokio::time::timeout(self.stop_timeout, self.protocol.stop_session()).await {
            Ok(Ok(())) => {
                info!("Session stopped");
                StopOutcome::Stopped
            }
            Ok(Err(e)) => {
                let reason = match e {
                    SessionError::SessionStop(reason) => reason,
                    other => other.to_string(),
                };
                warn!("Session stop failed: {}", reason);
                StopOutcome::Failed(reason)
            }
            Err(_) => {
                warn!("Session stop timed out after {:?}", self.stop_timeout);
                StopOutcome::TimedOut(self.stop_timeout)
            }
        };
        Some(outcome)
    }
}

impl<'a, P: PairingProtocol + ?Sized> Drop for SessionGuard<'a, P> {
    fn drop(&mut self) {
        if self.start_attempted && !self.stop_issued {
            error!(
                "{} session guard dropped without stop; resources may still be held",
                self.protocol.name()
            );
        }
    }
}
