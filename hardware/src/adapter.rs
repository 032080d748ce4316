//! The hardware adapter boundary

use tracing::debug;

use crate::error::HardwareResult;
use crate::request::{CameraSettings, HardwareRequest, LensSettings, LensState};

/// Payload hardware the server drives in response to commands.
///
/// Implementations are only ever called by one thread at a time; the server
/// keeps the adapter behind its command gate.
pub trait HardwareAdapter: Send {
    /// Push new camera settings (exposure) to the sensor driver.
    fn apply_camera_settings(&mut self, settings: &CameraSettings) -> HardwareResult<()>;

    /// Move focus and/or aperture and report where the lens ended up.
    fn apply_lens_settings(&mut self, settings: &LensSettings) -> HardwareResult<LensState>;

    /// Query the lens without moving it.
    fn lens_state(&mut self) -> HardwareResult<LensState>;

    /// Release the hardware at shutdown.
    fn release(&mut self) -> HardwareResult<()> {
        Ok(())
    }
}

impl<T: HardwareAdapter + ?Sized> HardwareAdapter for Box<T> {
    fn apply_camera_settings(&mut self, settings: &CameraSettings) -> HardwareResult<()> {
        (**self).apply_camera_settings(settings)
    }

    fn apply_lens_settings(&mut self, settings: &LensSettings) -> HardwareResult<LensState> {
        (**self).apply_lens_settings(settings)
    }

    fn lens_state(&mut self) -> HardwareResult<LensState> {
        (**self).lens_state()
    }

    fn release(&mut self) -> HardwareResult<()> {
        (**self).release()
    }
}

/// Apply a one-shot request: camera settings first, then lens motion.
///
/// Returns the acknowledged lens state if the lens was moved.
pub fn apply_request<H: HardwareAdapter + ?Sized>(
    adapter: &mut H,
    request: &HardwareRequest,
) -> HardwareResult<Option<LensState>> {
    if let Some(camera) = &request.camera {
        debug!("Applying exposure {:.3} ms", camera.exposure_ms);
        adapter.apply_camera_settings(camera)?;
    }

    if request.lens.is_empty() {
        return Ok(None);
    }

    debug!("Applying lens settings {:?}", request.lens);
    adapter.apply_lens_settings(&request.lens).map(Some)
}
