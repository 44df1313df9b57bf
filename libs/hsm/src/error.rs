//! HSM client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HsmError {
    #[error("HSM connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("HSM call timed out")]
    Timeout,

    #[error("HSM response was not valid hex")]
    MalformedResponse,

    #[error("HSM response too short: expected at least {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },

    #[error("HSM rejected the request (code {0})")]
    Failure(String),

    #[error("PAN too short to derive the format-0 PIN block PAN field: {0}")]
    PanTooShort(String),
}
