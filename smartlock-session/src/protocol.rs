//! Pairing Protocol Collaborator
//!
//! The pairing/authentication protocol (key exchange, proximity ranging,
//! message framing) lives outside this crate. The kiosk consumes it through
//! exactly three operations and nothing else:
//!
//! 1. produce a displayable pairing artifact
//! 2. begin the session
//! 3. end the session
//!
//! ## Implementing a Collaborator
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use smartlock_session::{PairingArtifact, PairingProtocol, Result};
//!
//! struct MyVerifier;
//!
//! #[async_trait]
//! impl PairingProtocol for MyVerifier {
//!     fn name(&self) -> &str {
//!         "my-verifier"
//!     }
//!
//!     async fn produce_pairing_artifact(&mut self) -> Result<PairingArtifact> {
//!         PairingArtifact::from_path("/run/verifier/pairing.png")
//!     }
//!
//!     async fn start_session(&mut self) -> Result<()> {
//!         // Begin advertising; return once initiated, not once paired
//!         Ok(())
//!     }
//!
//!     async fn stop_session(&mut self) -> Result<()> {
//!         // Release radios and sockets; must tolerate a missing or failed start
//!         Ok(())
//!     }
//! }
//! ```

use crate::{PairingArtifact, Result};
use async_trait::async_trait;

/// External pairing/authentication protocol, as seen by the kiosk
///
/// Only the session lifecycle bridge calls `start_session` and
/// `stop_session`, and it calls each at most once per run.
#[async_trait]
pub trait PairingProtocol: Send {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Produce the pairing artifact to display
    ///
    /// Called exactly once, before any window exists.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Artifact` if no session context could be
    /// established.
    async fn produce_pairing_artifact(&mut self) -> Result<PairingArtifact>;

    /// Begin advertising/listening for the proximity peer
    ///
    /// Returns once the session is initiated, not once a peer has paired.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionStart` if the session could not be
    /// initiated. Resources may still be partially acquired.
    async fn start_session(&mut self) -> Result<()>;

    /// End the session and release underlying resources
    ///
    /// Must be safe to call when `start_session` was never called or failed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionStop` if resources could not be released
    /// cleanly. Callers treat this as best-effort.
    async fn stop_session(&mut self) -> Result<()>;
}
