use thiserror::Error;

/// Errors raised while decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Buffer length does not match the fixed message size.
    #[error("expected {expected} bytes for {message}, got {actual}")]
    Length {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A floating point field decoded to NaN or infinity.
    #[error("non-finite value in {message} field `{field}`")]
    NonFinite {
        message: &'static str,
        field: &'static str,
    },
}

/// Result type for protocol decoding.
pub type ProtoResult<T> = Result<T, ProtoError>;
