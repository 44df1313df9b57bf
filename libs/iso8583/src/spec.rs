//! The field table shared by both wire dialects.
//!
//! Only the fields this gateway actually touches are defined — MTI plus
//! 2, 3, 4, 7, 11, 12, 13, 32, 37, 39, 41, 42, 43, 48, 52 and 70. A real
//! 1987 spec defines all 128 bit positions; we don't carry the ones we
//! never read or write.

/// Which side of the gateway a message was read from or is being written
/// for. The two dialects share the field table below and differ only in
/// how the bitmap and length indicators are rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Terminal-facing wire format: bitmap as 16 (or 32) uppercase hex
    /// ASCII characters, length indicators as ASCII digit characters.
    Ascii,
    /// Host-facing wire format: bitmap as 8 (or 16) raw bytes, length
    /// indicators as raw binary byte values.
    Hex,
}

/// Content type, used only to pick the pad character for fixed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    /// Zero-padded on the left.
    Numeric,
    /// Space-padded on the right.
    Alphanumeric,
}

/// How a field's length is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Fixed width, no length indicator.
    Fixed(usize),
    /// 1-digit length indicator, max 9.
    LVar(usize),
    /// 2-digit length indicator, max 99.
    LlVar(usize),
    /// 3-digit length indicator, max 999.
    LllVar(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub number: u8,
    pub shape: Shape,
    pub content: Content,
}

/// Every field this gateway knows how to pack and unpack.
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { number: 2, shape: Shape::LlVar(19), content: Content::Numeric },
    FieldSpec { number: 3, shape: Shape::Fixed(6), content: Content::Numeric },
    FieldSpec { number: 4, shape: Shape::Fixed(12), content: Content::Numeric },
    FieldSpec { number: 7, shape: Shape::Fixed(10), content: Content::Numeric },
    FieldSpec { number: 11, shape: Shape::LlVar(12), content: Content::Numeric },
    FieldSpec { number: 12, shape: Shape::Fixed(6), content: Content::Numeric },
    FieldSpec { number: 13, shape: Shape::Fixed(4), content: Content::Numeric },
    FieldSpec { number: 32, shape: Shape::LlVar(11), content: Content::Numeric },
    FieldSpec { number: 37, shape: Shape::Fixed(12), content: Content::Alphanumeric },
    FieldSpec { number: 39, shape: Shape::Fixed(2), content: Content::Numeric },
    FieldSpec { number: 41, shape: Shape::Fixed(8), content: Content::Alphanumeric },
    FieldSpec { number: 42, shape: Shape::Fixed(15), content: Content::Alphanumeric },
    FieldSpec { number: 43, shape: Shape::Fixed(40), content: Content::Alphanumeric },
    FieldSpec { number: 48, shape: Shape::LllVar(999), content: Content::Alphanumeric },
    FieldSpec { number: 52, shape: Shape::Fixed(16), content: Content::Alphanumeric },
    FieldSpec { number: 70, shape: Shape::Fixed(3), content: Content::Numeric },
];

pub fn lookup(number: u8) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.number == number)
}
