//! ISO 8583 field codec shared by the terminal (ASCII) and host (hex)
//! links.
//!
//! The field table only covers what this gateway reads or writes — see
//! [`spec::FIELDS`] — rather than the full 1987 field set.

mod codec;
mod convert;
mod error;
mod message;
mod spec;

pub use codec::{pack, unpack};
pub use convert::{convert, normalize_reversal_mti};
pub use error::IsoError;
pub use message::Message;
pub use spec::{Content, Dialect, FieldSpec, Shape, FIELDS};
