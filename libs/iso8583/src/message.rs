//! The in-memory message representation, shared by both dialects.
//!
//! Field values are always held as logical strings regardless of which
//! dialect a message was unpacked from — the dialects differ only in
//! wire encoding, never in what a field means.

use crate::error::IsoError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    mti: String,
    fields: BTreeMap<u8, String>,
}

impl Message {
    pub fn new(mti: impl Into<String>) -> Self {
        Message {
            mti: mti.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn mti(&self) -> &str {
        &self.mti
    }

    pub fn set_mti(&mut self, mti: impl Into<String>) {
        self.mti = mti.into();
    }

    pub fn get(&self, field: u8) -> Result<&str, IsoError> {
        self.fields
            .get(&field)
            .map(String::as_str)
            .ok_or(IsoError::FieldMissing(field))
    }

    pub fn has(&self, field: u8) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn set(&mut self, field: u8, value: impl Into<String>) -> Result<(), IsoError> {
        crate::spec::lookup(field).ok_or(IsoError::UnknownField(field))?;
        self.fields.insert(field, value.into());
        Ok(())
    }

    pub fn unset_field(&mut self, field: u8) {
        self.fields.remove(&field);
    }

    /// Fields present, in ascending order — the same order the bitmap and
    /// pack() walk them in.
    pub fn present_fields(&self) -> impl Iterator<Item = u8> + '_ {
        self.fields.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_unknown_field() {
        let mut m = Message::new("0800");
        assert!(matches!(m.set(99, "x"), Err(IsoError::UnknownField(99))));
    }

    #[test]
    fn get_missing_field_errors() {
        let m = Message::new("0800");
        assert!(matches!(m.get(11), Err(IsoError::FieldMissing(11))));
    }

    #[test]
    fn unset_then_get_is_missing() {
        let mut m = Message::new("0800");
        m.set(11, "000123").unwrap();
        m.unset_field(11);
        assert!(m.get(11).is_err());
    }
}
