//! ISO 8583 codec error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IsoError {
    /// Buffer ran out while reading a fixed-length field, a length
    /// indicator, or the bitmap itself.
    #[error("short buffer: expected {expected} more byte(s) for {what}, got {got}")]
    ShortBuffer {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A field's value does not fit the encoding its spec entry declares
    /// (non-numeric data in a numeric field, wrong byte count, etc).
    #[error("field {0}: {1}")]
    InvalidField(u8, &'static str),

    /// A variable-length field's value is longer than its spec allows.
    #[error("field {field}: value length {len} exceeds max {max}")]
    TooLong { field: u8, len: usize, max: usize },

    /// `set`/`pack` referenced a field number absent from the field table.
    #[error("field {0} is not defined in the field table")]
    UnknownField(u8),

    /// The MTI was missing, non-numeric, or not exactly 4 digits.
    #[error("malformed MTI: {0:?}")]
    MalformedMti(String),

    /// `get` was called for a field the message does not carry.
    #[error("field {0} not present")]
    FieldMissing(u8),
}
