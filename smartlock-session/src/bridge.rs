//! Session Lifecycle Bridge
//!
//! Orchestrates one pairing run:
//!
//! ```text
//! INIT --obtain artifact--> ARTIFACT_READY --show--> DISPLAYED
//! DISPLAYED --start session--> RUNNING
//! RUNNING --(pump + sleep) repeatedly--> RUNNING
//! RUNNING --cancel | termination | error--> STOPPING
//! STOPPING --stop session--> STOPPED
//! ```
//!
//! ## Guarantees
//!
//! - The artifact is shown before the session starts.
//! - `start_session` and `stop_session` are each called at most once.
//! - `stop_session` is called if and only if `start_session` was attempted,
//!   whichever way the run ends: operator cancel, external termination
//!   (including during start), a display failure, or a panic while starting
//!   or pumping.
//! - There is exactly one place that issues the stop: the cleanup region at
//!   the end of [`SessionBridge::run`], which every exit path falls through.
//!
//! ## Scheduling
//!
//! Single-threaded and cooperative. Each tick pumps the display surface (never
//! blocks), checks the cancel flag in the same pass, then sleeps for the tick
//! interval unless the termination future completes first. Input latency is
//! bounded by one interval and the loop is otherwise idle.
//!
//! A run future that is itself dropped mid-flight (e.g. the runtime shuts
//! down under it) cannot reach the cleanup region; signals that bypass
//! user-space entirely are out of reach as well.

use crate::cancel::CancelFlag;
use crate::display::{DisplaySurface, SurfaceState};
use crate::guard::{SessionGuard, StopOutcome};
use crate::{PairingArtifact, PairingProtocol, Result, SessionError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Default run-loop tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on the stop call
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Interval between display pumps
    pub tick_interval: Duration,
    /// Upper bound on `stop_session`
    pub stop_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Bridge lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Nothing done yet
    Init,
    /// Pairing artifact obtained
    ArtifactReady,
    /// Artifact visible on the display surface
    Displayed,
    /// Session started, loop running
    Running,
    /// Cleanup region entered
    Stopping,
    /// Terminal
    Stopped,
}

impl BridgeState {
    /// Check whether `next` is a legal successor
    ///
    /// Failures before the session starts jump straight to `Stopped`: no stop
    /// is owed.
    pub fn can_advance_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Init, ArtifactReady)
                | (Init, Stopped)
                | (ArtifactReady, Displayed)
                | (ArtifactReady, Stopped)
                | (Displayed, Running)
                | (Displayed, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Why the run loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Operator cancel input
    Cancelled,
    /// External termination signal
    Terminated,
    /// The window went away without a cancel (e.g. closed by the compositor)
    SurfaceClosed,
}

/// Everything observable about one run
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended
    pub outcome: std::result::Result<ExitReason, SessionError>,
    /// Whether `start_session` was attempted
    pub start_attempted: bool,
    /// Outcome of the single stop call; `None` iff no start was attempted
    pub stop: Option<StopOutcome>,
    /// Completed loop iterations (pump calls)
    pub iterations: u64,
    /// Every state the bridge passed through, starting with `Init`
    pub transitions: Vec<BridgeState>,
}

impl RunReport {
    /// Check whether the run ended without error
    ///
    /// Stop failures are best-effort and do not count.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        match &self.outcome {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }

    /// Final bridge state
    pub fn final_state(&self) -> BridgeState {
        self.transitions.last().copied().unwrap_or(BridgeState::Init)
    }
}

struct Lifecycle {
    state: BridgeState,
    transitions: Vec<BridgeState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: BridgeState::Init,
            transitions: vec![BridgeState::Init],
        }
    }

    fn advance(&mut self, next: BridgeState) {
        if !self.state.can_advance_to(next) {
            warn!("Unexpected bridge transition {:?} -> {:?}", self.state, next);
        }
        debug!("Bridge state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }
}

/// Drives the display surface and the protocol session for one run
#[derive(Debug, Clone, Default)]
pub struct SessionBridge {
    config: BridgeConfig,
}

impl SessionBridge {
    /// Create a bridge
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Timing configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run one pairing session to completion
    ///
    /// - `protocol`: the external collaborator; only this method starts and
    ///   stops it.
    /// - `show`: creates the display surface for the artifact (the backend's
    ///   `create_and_show`). The surface takes ownership of the artifact.
    /// - `termination`: completes when the process is asked to terminate.
    ///   Observed before the window is shown, while the session is starting,
    ///   and between loop iterations. Signal handlers behind it should be
    ///   installed before calling `run`.
    ///
    /// Never returns early past the point where a stop is owed; errors are
    /// reported through [`RunReport::outcome`] after cleanup.
    pub async fn run<P, S, F, T>(&self, protocol: &mut P, show: F, termination: T) -> RunReport
    where
        P: PairingProtocol + ?Sized,
        S: DisplaySurface,
        F: FnOnce(PairingArtifact) -> Result<S>,
        T: Future<Output = ()>,
    {
        tokio::pin!(termination);
        let mut lifecycle = Lifecycle::new();

        let artifact = match protocol.produce_pairing_artifact().await {
            Ok(artifact) => artifact,
            Err(e) => {
                let e = e.into_artifact_error();
                error!("{}", e.user_message());
                return Self::without_session(lifecycle, Err(e));
            }
        };
        let (width, height) = artifact.dimensions();
        info!("Pairing artifact ready ({}x{})", width, height);
        lifecycle.advance(BridgeState::ArtifactReady);

        if termination.as_mut().now_or_never().is_some() {
            info!("Termination requested before the pairing code was shown");
            return Self::without_session(lifecycle, Ok(ExitReason::Terminated));
        }

        let mut surface = match show(artifact) {
            Ok(surface) => surface,
            Err(e) => {
                let e = match e {
                    SessionError::Display(_) => e,
                    other => SessionError::Display(other.to_string()),
                };
                error!("{}", e.user_message());
                return Self::without_session(lifecycle, Err(e));
            }
        };
        lifecycle.advance(BridgeState::Displayed);

        let cancel = CancelFlag::new();
        surface.on_cancel(cancel.callback());

        let mut guard = SessionGuard::new(protocol, self.config.stop_timeout);
        let mut iterations = 0u64;

        // Start and loop share one unwind boundary: a panic in either still
        // reaches the cleanup region below.
        let session = async {
            let started = tokio::select! {
                biased;
                result = guard.start() => result.map(|()| true),
                _ = termination.as_mut() => Ok(false),
            };
            match started {
                Ok(true) => {}
                Ok(false) => {
                    info!("Termination requested while the session was starting");
                    return Ok(ExitReason::Terminated);
                }
                Err(e) => return Err(e),
            }

            lifecycle.advance(BridgeState::Running);
            info!(
                "Session running, pumping display every {:?}",
                self.config.tick_interval
            );
            self.run_loop(&mut surface, &cancel, termination.as_mut(), &mut iterations)
                .await
        };

        let outcome = match AssertUnwindSafe(session).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                if lifecycle.state == BridgeState::Running {
                    Err(SessionError::Loop(message))
                } else {
                    Err(SessionError::SessionStart(format!("panicked: {}", message)))
                }
            }
        };

        // Cleanup region: every path from here on issues the one stop.
        lifecycle.advance(BridgeState::Stopping);
        match &outcome {
            Ok(reason) => info!("Run loop ended: {:?}", reason),
            Err(e) => error!("Run loop ended with error: {}", e.user_message()),
        }

        if std::panic::catch_unwind(AssertUnwindSafe(|| surface.teardown())).is_err() {
            error!("Display teardown panicked; continuing with session stop");
        }

        let stop = guard.stop().await;
        let start_attempted = guard.start_attempted();
        drop(guard);
        lifecycle.advance(BridgeState::Stopped);

        RunReport {
            outcome,
            start_attempted,
            stop,
            iterations,
            transitions: lifecycle.transitions,
        }
    }

    async fn run_loop<S, T>(
        &self,
        surface: &mut S,
        cancel: &CancelFlag,
        mut termination: Pin<&mut T>,
        iterations: &mut u64,
    ) -> Result<ExitReason>
    where
        S: DisplaySurface,
        T: Future<Output = ()>,
    {
        loop {
            surface.pump().map_err(|e| match e {
                SessionError::Display(_) => e,
                other => SessionError::Display(other.to_string()),
            })?;
            *iterations += 1;
            trace!("Loop iteration {}", iterations);

            // Same pass as the pump that may have raised it
            if cancel.is_raised() {
                return Ok(ExitReason::Cancelled);
            }
            if surface.state() == SurfaceState::Closed {
                return Ok(ExitReason::SurfaceClosed);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = termination.as_mut() => {
                    info!("Termination requested");
                    return Ok(ExitReason::Terminated);
                }
            }
        }
    }

    /// Report for a run that ended before any start was attempted
    fn without_session(
        mut lifecycle: Lifecycle,
        outcome: std::result::Result<ExitReason, SessionError>,
    ) -> RunReport {
        lifecycle.advance(BridgeState::Stopped);
        RunReport {
            outcome,
            start_attempted: false,
            stop: None,
            iterations: 0,
            transitions: lifecycle.transitions,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
