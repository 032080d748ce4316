use std::io;

use thiserror::Error;

use crate::frame::FrameError;

/// Errors that stop the server from starting or serving.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame source error: {0}")]
    Frame(#[from] FrameError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] hardware::HardwareError),

    #[error("Solution log error: {0}")]
    SolutionLog(#[from] csv::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
