//! Generic `Device` trait for the automated target window.
//!
//! A device couples frame capture with input injection, because click
//! coordinates are only meaningful in the coordinate space of the frames the
//! same device produced.

use stagehand_types::{Frame, StageError};

/// A capture + input device bound to one target window.
///
/// Methods take `&self`: the perception loop captures while task threads
/// click, so drivers use interior mutability where they need state.
pub trait Device: Send + Sync {
    /// Stable identifier for this device, e.g. the window title.
    fn id(&self) -> &str;

    /// Grab the current contents of the target window.
    ///
    /// Returns `Ok(None)` when no frame is available right now (window
    /// minimised, not yet created…). Callers back off and retry.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::DeviceFault`] if the capture backend fails.
    fn capture(&self) -> Result<Option<Frame>, StageError>;

    /// Inject a left click at frame coordinates `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::DeviceFault`] if the input cannot be delivered.
    fn click(&self, x: i32, y: i32) -> Result<(), StageError>;

    /// Inject a wheel scroll of `delta` notches at `(x, y)`.
    fn scroll(&self, x: i32, y: i32, delta: i32) -> Result<(), StageError>;
}
