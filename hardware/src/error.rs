use thiserror::Error;

/// Errors raised by payload hardware drivers.
#[derive(Error, Debug)]
pub enum HardwareError {
    /// Low-level I/O error (port read/write failure).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not open the device.
    #[error("Failed to open {device}: {reason}")]
    OpenFailed { device: String, reason: String },

    /// No complete response within the timeout period.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Response doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Device reported an error code.
    #[error("Device error {code}: {message}")]
    DeviceError { code: i32, message: String },

    /// Request is outside what the device can do.
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

/// Result type for hardware operations.
pub type HardwareResult<T> = Result<T, HardwareError>;
