//! Settings the payload has actually applied, shared with the frame source

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Exposure and focus as last applied to the hardware.
///
/// The camera driver reads the exposure when it configures the next capture;
/// a simulated sky also reads focus to decide how blurred stars look.
/// Clones share the same values.
#[derive(Debug, Clone)]
pub struct AppliedSettings {
    exposure_bits: Arc<AtomicU64>,
    focus_position: Arc<AtomicI32>,
}

impl AppliedSettings {
    pub fn new(exposure_ms: f64, focus_position: i32) -> Self {
        Self {
            exposure_bits: Arc::new(AtomicU64::new(exposure_ms.to_bits())),
            focus_position: Arc::new(AtomicI32::new(focus_position)),
        }
    }

    pub fn exposure_ms(&self) -> f64 {
        f64::from_bits(self.exposure_bits.load(Ordering::Relaxed))
    }

    pub fn set_exposure_ms(&self, exposure_ms: f64) {
        self.exposure_bits
            .store(exposure_ms.to_bits(), Ordering::Relaxed);
    }

    pub fn focus_position(&self) -> i32 {
        self.focus_position.load(Ordering::Relaxed)
    }

    pub fn set_focus_position(&self, position: i32) {
        self.focus_position.store(position, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_values() {
        let applied = AppliedSettings::new(100.0, 10);
        let view = applied.clone();
        applied.set_exposure_ms(250.25);
        applied.set_focus_position(-4);
        assert_eq!(view.exposure_ms(), 250.25);
        assert_eq!(view.focus_position(), -4);
    }
}
