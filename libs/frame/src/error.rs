//! Frame codec error types.

use thiserror::Error;

/// Errors produced while reading or writing a length-prefixed frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The remote end closed the connection before a full frame arrived.
    #[error("connection closed by peer")]
    Eof,

    /// The read deadline elapsed before a full frame arrived.
    #[error("read deadline of {0:?} elapsed")]
    Timeout(std::time::Duration),

    /// The declared length was zero or exceeded the maximum frame size.
    #[error("invalid frame length {0} (must be 1..={1})")]
    Format(u16, u16),

    /// Any other I/O failure.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the connection cannot continue to be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Eof | FrameError::Timeout(_) | FrameError::Io(_))
    }
}
