//! Shared configuration store
//!
//! Holds the three parameter groups that make up telemetry, the last solved
//! pointing, and the payload hardware. Every mutation that must be
//! serialized against operator commands (command application, solution
//! recording, focus sweeps, hardware release) goes through a single gate,
//! which is also the only owner of the [`HardwareAdapter`]. Holding the gate
//! is therefore the only way to touch the hardware, so hardware adjustments
//! never overlap.
//!
//! Telemetry snapshots do not take the gate. Each group sits behind its own
//! short-lived lock, so a snapshot never sees a half-written group, but two
//! groups in one snapshot may come from different instants.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hardware::{
    apply_request, ApertureMove, CameraSettings, FocusMove, HardwareAdapter, HardwareRequest,
    HardwareResult, LensSettings, LensState,
};
use starcam_proto::{
    blob_index, AstrometryParams, BlobParams, CameraParams, Command, Telemetry, FOCUS_NO_OP,
};
use tracing::{debug, warn};

/// Last accepted sky pointing, used to narrow the next solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointing {
    /// Right ascension in degrees
    pub ra: f64,
    /// Declination in degrees
    pub dec: f64,
}

/// Solved fields written into [`AstrometryParams`] by the solve loop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolutionRecord {
    /// Mid-exposure timestamp, Unix seconds
    pub raw_time: f64,
    pub ra: f64,
    pub dec: f64,
    pub field_rotation: f64,
    pub pixel_scale: f64,
    pub image_rotation: f64,
    pub altitude: f64,
    pub azimuth: f64,
}

/// What applying one command did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyOutcome {
    /// The one-shot hardware request derived from the command
    pub request: HardwareRequest,
    /// Lens state acknowledged by the adapter, if the lens moved
    pub lens: Option<LensState>,
    /// The adapter rejected the request
    pub hardware_fault: bool,
}

pub struct ConfigStore {
    gate: Mutex<Box<dyn HardwareAdapter>>,
    astrometry: RwLock<AstrometryParams>,
    camera: RwLock<CameraParams>,
    blob: RwLock<BlobParams>,
    pointing: RwLock<Option<Pointing>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("astrometry", &*read(&self.astrometry))
            .field("camera", &*read(&self.camera))
            .field("blob", &*read(&self.blob))
            .field("pointing", &*read(&self.pointing))
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Overwrite `slot` unless the command carries the negative "leave unchanged"
/// sentinel.
fn set_unless_negative(slot: &mut i32, value: f32) {
    if value >= 0.0 {
        *slot = value as i32;
    }
}

impl ConfigStore {
    pub fn new(
        adapter: Box<dyn HardwareAdapter>,
        astrometry: AstrometryParams,
        camera: CameraParams,
        blob: BlobParams,
    ) -> Self {
        Self {
            gate: Mutex::new(adapter),
            astrometry: RwLock::new(astrometry),
            camera: RwLock::new(camera),
            blob: RwLock::new(blob),
            pointing: RwLock::new(None),
        }
    }

    /// Store with default site, camera and detection parameters.
    pub fn with_defaults(adapter: Box<dyn HardwareAdapter>) -> Self {
        Self::new(
            adapter,
            AstrometryParams::default(),
            CameraParams::default(),
            BlobParams::default(),
        )
    }

    fn lock_gate(&self) -> MutexGuard<'_, Box<dyn HardwareAdapter>> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the adapter where the lens is and record it, under the gate.
    pub fn sync_lens_state(&self) -> HardwareResult<LensState> {
        let mut adapter = self.lock_gate();
        let state = adapter.lens_state()?;
        write_lens_state(&mut write(&self.camera), &state);
        Ok(state)
    }

    /// Apply one operator command to every parameter group and push the
    /// resulting one-shot request to the hardware, all under the gate.
    ///
    /// Blocks on the gate and on serial I/O; call from a blocking context.
    pub fn apply_command(&self, cmd: &Command) -> ApplyOutcome {
        let mut adapter = self.lock_gate();

        {
            let mut astrometry = write(&self.astrometry);
            astrometry.odds_threshold = cmd.odds_threshold;
            astrometry.latitude = cmd.latitude;
            astrometry.longitude = cmd.longitude;
            astrometry.height = cmd.height;
        }

        let request = {
            let mut camera = write(&self.camera);

            let exposure = cmd.exposure;
            let camera_settings = if exposure.ceil() != camera.exposure_time.ceil() {
                camera.exposure_time = exposure;
                Some(CameraSettings {
                    exposure_ms: exposure,
                })
            } else {
                None
            };

            camera.focus_mode = cmd.focus_mode;
            camera.start_focus_position = cmd.start_focus_position;
            camera.end_focus_position = cmd.end_focus_position;
            camera.focus_step = cmd.focus_step;
            camera.focus_infinity = cmd.set_focus_infinity;
            camera.aperture_steps = cmd.aperture_steps;
            camera.max_aperture = cmd.set_max_aperture;

            let requested_focus = cmd.focus_position;
            let previous_focus = camera.focus_position;
            if requested_focus != FOCUS_NO_OP {
                camera.focus_position = requested_focus as i32;
            }

            let focus = if cmd.set_focus_infinity != 0 {
                Some(FocusMove::Infinity)
            } else if requested_focus != FOCUS_NO_OP && requested_focus as i32 != previous_focus {
                Some(FocusMove::Absolute(requested_focus as i32))
            } else {
                None
            };

            let aperture = if cmd.set_max_aperture != 0 {
                Some(ApertureMove::Open)
            } else if cmd.aperture_steps != 0 {
                Some(ApertureMove::Steps(cmd.aperture_steps))
            } else {
                None
            };

            HardwareRequest {
                camera: camera_settings,
                lens: LensSettings { focus, aperture },
            }
        };

        {
            let values = cmd.blob_params;
            let mut blob = write(&self.blob);
            set_unless_negative(&mut blob.spike_limit, values[blob_index::SPIKE_LIMIT]);
            set_unless_negative(
                &mut blob.dynamic_hot_pixels,
                values[blob_index::DYNAMIC_HOT_PIXELS],
            );
            set_unless_negative(&mut blob.r_smooth, values[blob_index::R_SMOOTH]);
            set_unless_negative(
                &mut blob.high_pass_filter,
                values[blob_index::HIGH_PASS_FILTER],
            );
            set_unless_negative(
                &mut blob.r_high_pass_filter,
                values[blob_index::R_HIGH_PASS_FILTER],
            );
            set_unless_negative(
                &mut blob.centroid_search_border,
                values[blob_index::CENTROID_SEARCH_BORDER],
            );
            set_unless_negative(
                &mut blob.filter_return_image,
                values[blob_index::FILTER_RETURN_IMAGE],
            );
            if values[blob_index::N_SIGMA] >= 0.0 {
                blob.n_sigma = values[blob_index::N_SIGMA];
            }
            set_unless_negative(
                &mut blob.unique_star_spacing,
                values[blob_index::UNIQUE_STAR_SPACING],
            );
            blob.make_static_hp_mask = cmd.make_hot_pixel_mask;
            blob.use_static_hp_mask = cmd.use_hot_pixel_mask;
        }

        if request.is_empty() {
            return ApplyOutcome {
                request,
                lens: None,
                hardware_fault: false,
            };
        }

        debug!("Applying hardware request {:?}", request);
        match apply_request(adapter.as_mut(), &request) {
            Ok(lens) => {
                let mut camera = write(&self.camera);
                if let Some(state) = &lens {
                    write_lens_state(&mut camera, state);
                }
                camera.hardware_fault = 0;
                ApplyOutcome {
                    request,
                    lens,
                    hardware_fault: false,
                }
            }
            Err(e) => {
                warn!("Hardware rejected {:?}: {}", request, e);
                write(&self.camera).hardware_fault = 1;
                ApplyOutcome {
                    request,
                    lens: None,
                    hardware_fault: true,
                }
            }
        }
    }

    /// Move the lens outside of an operator command (focus sweeps).
    pub fn move_lens(&self, settings: &LensSettings) -> HardwareResult<LensState> {
        let mut adapter = self.lock_gate();
        match adapter.apply_lens_settings(settings) {
            Ok(state) => {
                let mut camera = write(&self.camera);
                write_lens_state(&mut camera, &state);
                camera.hardware_fault = 0;
                Ok(state)
            }
            Err(e) => {
                write(&self.camera).hardware_fault = 1;
                Err(e)
            }
        }
    }

    /// Mark the requested focus sweep as done.
    pub fn finish_focus_sweep(&self) {
        let _gate = self.lock_gate();
        write(&self.camera).focus_mode = 0;
    }

    /// Write an accepted solution and remember its pointing.
    pub fn record_solution(&self, solution: &SolutionRecord) {
        let _gate = self.lock_gate();
        {
            let mut astrometry = write(&self.astrometry);
            astrometry.raw_time = solution.raw_time;
            astrometry.ra = solution.ra;
            astrometry.dec = solution.dec;
            astrometry.field_rotation = solution.field_rotation;
            astrometry.pixel_scale = solution.pixel_scale;
            astrometry.image_rotation = solution.image_rotation;
            astrometry.altitude = solution.altitude;
            astrometry.azimuth = solution.azimuth;
        }
        *write(&self.pointing) = Some(Pointing {
            ra: solution.ra,
            dec: solution.dec,
        });
    }

    pub fn pointing_estimate(&self) -> Option<Pointing> {
        *read(&self.pointing)
    }

    pub fn astrometry(&self) -> AstrometryParams {
        *read(&self.astrometry)
    }

    pub fn camera(&self) -> CameraParams {
        *read(&self.camera)
    }

    pub fn blob_params(&self) -> BlobParams {
        *read(&self.blob)
    }

    /// Copy all three groups for telemetry without taking the gate.
    pub fn snapshot(&self) -> Telemetry {
        Telemetry::new(self.astrometry(), self.camera(), self.blob_params())
    }

    /// Release the hardware at shutdown, after any in-flight command.
    pub fn release_hardware(&self) -> HardwareResult<()> {
        self.lock_gate().release()
    }
}

fn write_lens_state(camera: &mut CameraParams, state: &LensState) {
    camera.focus_position = state.focus_position;
    camera.min_focus_position = state.min_focus_position;
    camera.max_focus_position = state.max_focus_position;
    camera.current_aperture = state.f_number_x10;
}
