//! Error handling for the pairing session lifecycle
//!
//! A single error type covers every failure the kiosk can observe: producing
//! the pairing artifact, showing it, and starting or stopping the external
//! protocol session. Errors from underlying libraries convert automatically
//! through `thiserror`.
//!
//! ## Error Categories
//!
//! ### Fatal before the session
//! - `Artifact`: no pairing artifact could be produced. No window is shown and
//!   no session is started.
//! - `Display`: the window or rendering backend is unavailable. Before the
//!   session starts this is treated exactly like `Artifact`; mid-run it ends
//!   the run loop.
//!
//! ### Session lifecycle
//! - `SessionStart`: the session failed to start. The stop path still runs.
//! - `SessionStop` / `StopTimeout`: logged, never retried or escalated.
//!
//! ### Run loop
//! - `Loop`: a failure or panic caught at the run-loop boundary.
//!
//! ## Logging Errors
//!
//! ```rust,ignore
//! use tracing::{error, warn};
//!
//! if let Err(e) = guard.start().await {
//!     error!("Session failed to start: {}", e);
//! }
//!
//! if let Some(StopOutcome::Failed(reason)) = guard.stop().await {
//!     warn!("Best-effort stop failed: {}", reason);
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type for session operations
///
/// # Examples
///
/// ```rust
/// use smartlock_session::Result;
///
/// fn example() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur while running a pairing session
///
/// # Examples
///
/// ```rust
/// use smartlock_session::SessionError;
///
/// let error = SessionError::Artifact("verifier produced no image".to_string());
/// assert_eq!(error.to_string(), "Pairing artifact error: verifier produced no image");
/// assert!(error.is_fatal_before_session());
///
/// let error = SessionError::SessionStop("radio busy".to_string());
/// assert!(!error.is_fatal_before_session());
/// ```
#[derive(Error, Debug)]
pub enum SessionError {
    /// The pairing artifact could not be produced
    #[error("Pairing artifact error: {0}")]
    Artifact(String),

    /// The display surface is unavailable or failed while rendering
    #[error("Display error: {0}")]
    Display(String),

    /// The protocol session failed to start
    #[error("Session start error: {0}")]
    SessionStart(String),

    /// The protocol session failed to stop
    #[error("Session stop error: {0}")]
    SessionStop(String),

    /// The protocol session did not stop within the allowed time
    #[error("Session stop timed out after {0:?}")]
    StopTimeout(Duration),

    /// A failure caught at the run-loop boundary
    ///
    /// Panics raised while pumping the display surface are converted into
    /// this variant so they still pass through the single stop path.
    #[error("Run loop failed: {0}")]
    Loop(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation attempted in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error (files, child processes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Check if this error ends the run before any session is started
    ///
    /// Artifact and display failures are raised before `start_session` is
    /// attempted, so no stop is owed for them.
    pub fn is_fatal_before_session(&self) -> bool {
        matches!(
            self,
            SessionError::Artifact(_)
                | SessionError::Display(_)
                | SessionError::Configuration(_)
        )
    }

    /// Process exit code for a run that ended with this error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use smartlock_session::SessionError;
    ///
    /// assert_eq!(SessionError::Artifact("none".into()).exit_code(), 2);
    /// assert_eq!(SessionError::SessionStart("refused".into()).exit_code(), 4);
    /// ```
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::Artifact(_) | SessionError::Image(_) | SessionError::Json(_) => 2,
            SessionError::Display(_) => 3,
            SessionError::SessionStart(_) => 4,
            SessionError::Loop(_) => 5,
            SessionError::Configuration(_) => 78,
            _ => 1,
        }
    }

    /// Get a short operator-facing message for the operational log
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Artifact(msg) => {
                format!("No pairing code available: {}. Check the verifier setup.", msg)
            }
            SessionError::Display(msg) => {
                format!("Cannot show the pairing code: {}. Check the display.", msg)
            }
            SessionError::SessionStart(msg) => {
                format!("Pairing session did not start: {}.", msg)
            }
            SessionError::SessionStop(msg) => {
                format!("Pairing session did not stop cleanly: {}.", msg)
            }
            SessionError::StopTimeout(after) => {
                format!("Pairing session did not stop within {:?}.", after)
            }
            SessionError::Loop(msg) => format!("Kiosk loop failed: {}.", msg),
            SessionError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            SessionError::InvalidState(msg) => format!("Invalid state: {}.", msg),
            SessionError::Io(e) => format!("I/O error: {}.", e),
            SessionError::Image(e) => format!("Image error: {}.", e),
            SessionError::Json(e) => format!("Data format error: {}.", e),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SessionError::InvalidState(msg.into())
    }

    /// Re-tag an error raised while producing the pairing artifact
    ///
    /// Whatever went wrong underneath (file missing, bad PNG, malformed
    /// payload), the bridge treats it as an artifact failure.
    pub fn into_artifact_error(self) -> Self {
        match self {
            SessionError::Artifact(_) => self,
            other => SessionError::Artifact(other.to_string()),
        }
    }
}
