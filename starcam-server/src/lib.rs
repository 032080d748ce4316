//! Star camera command/telemetry server
//!
//! Ground clients connect over TCP and exchange fixed-size binary messages
//! with the payload: a [`Command`](starcam_proto::Command) in, a
//! [`Telemetry`](starcam_proto::Telemetry) snapshot plus the latest raw frame
//! out, once per session cycle.
//!
//! - [`store::ConfigStore`] holds the shared parameters and serializes every
//!   command and hardware adjustment behind one gate.
//! - [`session::Session`] runs one client connection.
//! - [`server::Server`] accepts connections and spawns sessions.
//! - [`solve_loop::SolveLoop`] captures, extracts stars and plate-solves on
//!   a dedicated thread, writing pointing back into the store.
//!
//! Frame sources, star extraction, plate solving and the sky transform sit
//! behind traits so flight hardware and simulation share the same loop.

pub mod config;
pub mod error;
pub mod extract;
pub mod frame;
pub mod server;
pub mod session;
pub mod sky;
pub mod solution_log;
pub mod solve_loop;
pub mod solver;
pub mod store;

pub use error::{ServerError, ServerResult};
