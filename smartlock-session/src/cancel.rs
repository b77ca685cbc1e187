//! Operator cancellation flag
//!
//! Single-writer (the display surface's cancel handler), single-reader (the
//! bridge's run loop). Raised at most once; later raises are no-ops.
//!
//! The flag is atomic so a backend that pumps its window on another OS
//! thread can raise it without any change on the reading side.

use crate::display::CancelCallback;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared one-shot cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    ///
    /// Returns `true` only for the call that actually raised it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use smartlock_session::CancelFlag;
    ///
    /// let flag = CancelFlag::new();
    /// assert!(flag.raise());
    /// assert!(!flag.raise());
    /// assert!(flag.is_raised());
    /// ```
    pub fn raise(&self) -> bool {
        let first = !self.raised.swap(true, Ordering::AcqRel);
        if first {
            info!("Operator requested cancel");
        } else {
            debug!("Cancel already requested, ignoring");
        }
        first
    }

    /// Check whether cancellation was requested
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Callback for [`DisplaySurface::on_cancel`](crate::DisplaySurface::on_cancel)
    pub fn callback(&self) -> CancelCallback {
        let flag = self.clone();
        Box::new(move || {
            flag.raise();
        })
    }
}
