//! Star camera wire protocol
//!
//! Fixed-shape, packed binary messages exchanged between the star camera
//! server and its operator clients over a bare TCP stream.
//!
//! - [`Command`] (client to server, 116 bytes) carries candidate values for
//!   every configuration group in a single message.
//! - [`Telemetry`] (server to client, 196 bytes) is a snapshot of
//!   [`AstrometryParams`], [`CameraParams`] and [`BlobParams`], in that order.
//!   Each telemetry message is followed on the wire by one raw 8-bit frame of
//!   `width * height` bytes.
//!
//! All multi-byte fields use host byte order. Every supported target is
//! little-endian, which is what existing ground clients expect.

mod command;
mod error;
pub mod params;
mod telemetry;

pub use command::{blob_index, Command, BLOB_PARAM_COUNT, BLOB_SKIP, FOCUS_NO_OP};
pub use error::{ProtoError, ProtoResult};
pub use params::{AstrometryParams, BlobParams, CameraParams};
pub use telemetry::Telemetry;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 8000;

/// Sensor width of the flight camera in pixels.
pub const SENSOR_WIDTH: usize = 1936;

/// Sensor height of the flight camera in pixels.
pub const SENSOR_HEIGHT: usize = 1216;

/// Size of the raw 8-bit frame that follows every telemetry message.
pub const fn frame_len(width: usize, height: usize) -> usize {
    width * height
}
