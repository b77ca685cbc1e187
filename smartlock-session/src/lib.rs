//! Smartlock Pairing Session
//!
//! Keeps a scannable pairing code on screen for the lifetime of a
//! proximity-pairing session run by an external protocol component, and
//! guarantees that session is stopped exactly once however the run ends.
//!
//! The crate is split along the seams of one run:
//!
//! - [`protocol`]: the three-operation contract of the external protocol
//! - [`verifier`]: that contract backed by an external verifier process
//! - [`artifact`]: the pairing image (files, PNG bytes, QR payloads)
//! - [`display`]: the display surface contract and frame composition
//! - [`bridge`]: the lifecycle bridge tying the two together

pub mod artifact;
pub mod bridge;
pub mod cancel;
pub mod display;
pub mod guard;
pub mod protocol;
pub mod verifier;

mod error;

pub use artifact::{PairingArtifact, PairingPayload};
pub use bridge::{
    BridgeConfig, BridgeState, ExitReason, RunReport, SessionBridge, DEFAULT_STOP_TIMEOUT,
    DEFAULT_TICK_INTERVAL,
};
pub use cancel::CancelFlag;
pub use display::{
    fit_within, CancelCallback, DisplaySurface, Frame, SurfaceState, Viewport, DEFAULT_VIEWPORT,
};
pub use error::{Result, SessionError};
pub use guard::{SessionGuard, StopOutcome};
pub use protocol::PairingProtocol;
pub use verifier::{
    ArtifactSource, VerifierProcess, VerifierSettings, DEFAULT_STARTUP_GRACE, DEFAULT_STOP_GRACE,
};
