//! Birger-style serial lens adapter driver
//!
//! The adapter speaks a short ASCII protocol. Each command is a two letter
//! mnemonic, optionally followed by a signed integer, terminated by `\r`. The
//! adapter answers every command with one line terminated by `\r`; a line
//! starting with `ERR` reports a failure.
//!
//! | Command | Meaning                         | Response                           |
//! |---------|---------------------------------|------------------------------------|
//! | `la`    | learn focus range               | `OK`                               |
//! | `fa<n>` | move focus to absolute position | `DONE<n>,<n>`                      |
//! | `mi`    | move focus to infinity stop     | `DONE<n>,<n>`                      |
//! | `mo`    | open aperture fully             | `DONE<n>,f<fx10>`                  |
//! | `mn<n>` | move aperture by `n` steps      | `DONE<n>,f<fx10>`                  |
//! | `fp`    | focus position query            | `fmin:<n>  fmax:<n>  current:<n>`  |
//! | `pa`    | aperture position query         | `<steps>,f<fx10>`                  |
//!
//! # Example
//!
//! ```no_run
//! use hardware::birger::BirgerLens;
//!
//! let mut lens = BirgerLens::open("/dev/ttyLens0", 115200)?;
//! let focus = lens.focus_range()?;
//! println!("Focus {} in [{}, {}]", focus.current, focus.min, focus.max);
//! # Ok::<(), hardware::HardwareError>(())
//! ```

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, trace};

use crate::adapter::HardwareAdapter;
use crate::applied::AppliedSettings;
use crate::error::{HardwareError, HardwareResult};
use crate::request::{ApertureMove, CameraSettings, FocusMove, LensSettings, LensState};

/// Baud rate the adapter ships configured for.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Lens moves can take a couple of seconds at full travel.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const EOL: u8 = b'\r';

/// Focus encoder range and current position as reported by `fp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRange {
    pub min: i32,
    pub max: i32,
    pub current: i32,
}

/// Serial connection to the lens adapter.
pub struct BirgerLens<T: Read + Write + Send = Box<dyn SerialPort>> {
    port: T,
}

impl BirgerLens<Box<dyn SerialPort>> {
    /// Open the adapter on a serial device.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::OpenFailed`] if the port cannot be opened.
    pub fn open(device: &str, baud: u32) -> HardwareResult<Self> {
        let port = serialport::new(device, baud)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(|e| HardwareError::OpenFailed {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened lens adapter on {device} at {baud} baud");
        Ok(Self::from_port(port))
    }
}

impl<T: Read + Write + Send> BirgerLens<T> {
    /// Wrap an already-open transport.
    pub fn from_port(port: T) -> Self {
        Self { port }
    }

    /// Send one command and read its single-line response.
    pub fn query(&mut self, command: &str) -> HardwareResult<String> {
        debug!("Lens send: {:?}", command);
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(&[EOL])?;
        self.port.flush()?;

        let response = self.read_line()?;
        if let Some(rest) = response.strip_prefix("ERR") {
            let code = rest.trim().parse().unwrap_or(-1);
            return Err(HardwareError::DeviceError {
                code,
                message: format!("{command} rejected"),
            });
        }
        Ok(response)
    }

    fn read_line(&mut self) -> HardwareResult<String> {
        let mut buf = [0u8; 1];
        let mut bytes = Vec::new();

        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(HardwareError::Timeout),
                Ok(_) => match buf[0] {
                    EOL => break,
                    // Some firmware pads lines with LF.
                    b'\n' => {}
                    byte => bytes.push(byte),
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(HardwareError::Timeout);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(HardwareError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let response = String::from_utf8_lossy(&bytes).trim().to_string();
        trace!("Lens recv: {:?}", response);
        Ok(response)
    }

    /// Make the adapter sweep the focus motor to learn its end stops.
    pub fn learn_focus_range(&mut self) -> HardwareResult<()> {
        self.query("la").map(|_| ())
    }

    pub fn focus_absolute(&mut self, position: i32) -> HardwareResult<()> {
        self.query(&format!("fa{position}")).map(|_| ())
    }

    pub fn focus_infinity(&mut self) -> HardwareResult<()> {
        self.query("mi").map(|_| ())
    }

    pub fn aperture_open(&mut self) -> HardwareResult<()> {
        self.query("mo").map(|_| ())
    }

    pub fn aperture_steps(&mut self, steps: i32) -> HardwareResult<()> {
        self.query(&format!("mn{steps}")).map(|_| ())
    }

    pub fn focus_range(&mut self) -> HardwareResult<FocusRange> {
        let response = self.query("fp")?;
        parse_focus_range(&response)
    }

    /// Current f-number times ten.
    pub fn f_number_x10(&mut self) -> HardwareResult<i32> {
        let response = self.query("pa")?;
        parse_f_number(&response)
    }

    pub fn state(&mut self) -> HardwareResult<LensState> {
        let focus = self.focus_range()?;
        let f_number_x10 = self.f_number_x10()?;
        Ok(LensState {
            focus_position: focus.current,
            min_focus_position: focus.min,
            max_focus_position: focus.max,
            f_number_x10,
        })
    }
}

/// Parse `fmin:<n>  fmax:<n>  current:<n>`.
pub fn parse_focus_range(response: &str) -> HardwareResult<FocusRange> {
    let mut min = None;
    let mut max = None;
    let mut current = None;

    for token in response.split_whitespace() {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let value: i32 = value
            .parse()
            .map_err(|_| HardwareError::InvalidResponse(format!("bad focus value: {token}")))?;
        match key {
            "fmin" => min = Some(value),
            "fmax" => max = Some(value),
            "current" => current = Some(value),
            _ => {}
        }
    }

    match (min, max, current) {
        (Some(min), Some(max), Some(current)) => Ok(FocusRange { min, max, current }),
        _ => Err(HardwareError::InvalidResponse(format!(
            "incomplete focus report: {response}"
        ))),
    }
}

/// Parse the `f<fx10>` token out of an aperture report such as `12,f28`.
pub fn parse_f_number(response: &str) -> HardwareResult<i32> {
    response
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|token| token.strip_prefix('f'))
        .find_map(|digits| digits.parse().ok())
        .ok_or_else(|| HardwareError::InvalidResponse(format!("no f-number in: {response}")))
}

/// Payload backed by a real lens adapter.
///
/// Exposure is published through [`AppliedSettings`] for the camera capture
/// path; focus and aperture go to the lens over serial.
pub struct BirgerPayload<T: Read + Write + Send = Box<dyn SerialPort>> {
    lens: BirgerLens<T>,
    applied: AppliedSettings,
}

impl<T: Read + Write + Send> BirgerPayload<T> {
    /// Learn the focus range and publish the starting focus position.
    pub fn initialize(mut lens: BirgerLens<T>, applied: AppliedSettings) -> HardwareResult<Self> {
        lens.learn_focus_range()?;
        let focus = lens.focus_range()?;
        applied.set_focus_position(focus.current);
        debug!(
            "Lens focus range [{}, {}], current {}",
            focus.min, focus.max, focus.current
        );
        Ok(Self { lens, applied })
    }
}

impl<T: Read + Write + Send> HardwareAdapter for BirgerPayload<T> {
    fn apply_camera_settings(&mut self, settings: &CameraSettings) -> HardwareResult<()> {
        if !settings.exposure_ms.is_finite() || settings.exposure_ms < 0.0 {
            return Err(HardwareError::OutOfRange(format!(
                "exposure {} ms",
                settings.exposure_ms
            )));
        }
        self.applied.set_exposure_ms(settings.exposure_ms);
        Ok(())
    }

    fn apply_lens_settings(&mut self, settings: &LensSettings) -> HardwareResult<LensState> {
        match settings.focus {
            Some(FocusMove::Infinity) => self.lens.focus_infinity()?,
            Some(FocusMove::Absolute(position)) => self.lens.focus_absolute(position)?,
            None => {}
        }
        match settings.aperture {
            Some(ApertureMove::Open) => self.lens.aperture_open()?,
            Some(ApertureMove::Steps(steps)) => self.lens.aperture_steps(steps)?,
            None => {}
        }

        let state = self.lens.state()?;
        self.applied.set_focus_position(state.focus_position);
        Ok(state)
    }

    fn lens_state(&mut self) -> HardwareResult<LensState> {
        self.lens.state()
    }
}
