//! Hardware drivers for the star camera payload.
//!
//! The server never talks to motors or the sensor directly. It hands a
//! one-shot [`HardwareRequest`] to a [`HardwareAdapter`], which applies it and
//! acknowledges with the lens state it actually reached.
//!
//! # Features
//!
//! - `birger` - Birger-style serial lens adapter driving focus and aperture
//!   motors (default)
//!
//! The [`simulated`] payload is always available and is what tests and the
//! mock server run against.

mod adapter;
mod applied;
mod error;
mod request;
pub mod simulated;

#[cfg(feature = "birger")]
pub mod birger;

pub use adapter::{apply_request, HardwareAdapter};
pub use applied::AppliedSettings;
pub use error::{HardwareError, HardwareResult};
pub use request::{ApertureMove, CameraSettings, FocusMove, HardwareRequest, LensSettings, LensState};
