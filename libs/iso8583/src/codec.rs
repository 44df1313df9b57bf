//! Pack and unpack between [`Message`] and the wire bytes of a dialect.
//!
//! The two dialects share the field table in [`crate::spec`] and differ
//! only in how the bitmap and length indicators are rendered: ASCII
//! digit characters on the terminal side, raw binary bytes on the host
//! side. The MTI itself is always 4 ASCII digit characters in both — real
//! binary ISO 8583 variants sometimes BCD-encode it too, but this
//! gateway's two sides agree on ASCII MTIs, so there is nothing to
//! normalize there.

use crate::error::IsoError;
use crate::message::Message;
use crate::spec::{self, Content, Dialect, Shape};

const PRIMARY_BITS: u8 = 64;

pub fn pack(msg: &Message, dialect: Dialect) -> Result<Vec<u8>, IsoError> {
    let mti = msg.mti();
    if mti.len() != 4 || !mti.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IsoError::MalformedMti(mti.to_string()));
    }

    let mut primary = [0u8; 8];
    let mut secondary = [0u8; 8];
    let mut has_secondary = false;

    for field in msg.present_fields() {
        if field <= PRIMARY_BITS {
            set_bit(&mut primary, field);
        } else {
            has_secondary = true;
            set_bit(&mut secondary, field - PRIMARY_BITS);
        }
    }
    if has_secondary {
        set_bit(&mut primary, 1);
    }

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(mti.as_bytes());
    encode_bitmap(&mut out, &primary, dialect);
    if has_secondary {
        encode_bitmap(&mut out, &secondary, dialect);
    }

    for field in msg.present_fields() {
        let spec = spec::lookup(field).ok_or(IsoError::UnknownField(field))?;
        let value = msg.get(field)?;
        encode_field(&mut out, spec.shape, spec.content, value, dialect, field)?;
    }

    Ok(out)
}

pub fn unpack(bytes: &[u8], dialect: Dialect) -> Result<Message, IsoError> {
    let mut pos = 0usize;

    let mti_bytes = take(bytes, &mut pos, 4, "MTI")?;
    if !mti_bytes.iter().all(|b| b.is_ascii_digit()) {
        return Err(IsoError::MalformedMti(String::from_utf8_lossy(mti_bytes).into_owned()));
    }
    let mti = std::str::from_utf8(mti_bytes).unwrap().to_string();
    let mut msg = Message::new(mti);

    let bitmap_width = match dialect {
        Dialect::Ascii => 16,
        Dialect::Hex => 8,
    };
    let primary = decode_bitmap(take(bytes, &mut pos, bitmap_width, "primary bitmap")?, dialect)?;
    let secondary = if get_bit(&primary, 1) {
        decode_bitmap(take(bytes, &mut pos, bitmap_width, "secondary bitmap")?, dialect)?
    } else {
        [0u8; 8]
    };

    for bit in 2..=PRIMARY_BITS {
        if get_bit(&primary, bit) {
            decode_one_field(bytes, &mut pos, bit, dialect, &mut msg)?;
        }
    }
    for bit in 1..=PRIMARY_BITS {
        if get_bit(&secondary, bit) {
            decode_one_field(bytes, &mut pos, bit + PRIMARY_BITS, dialect, &mut msg)?;
        }
    }

    Ok(msg)
}

fn decode_one_field(
    bytes: &[u8],
    pos: &mut usize,
    field: u8,
    dialect: Dialect,
    msg: &mut Message,
) -> Result<(), IsoError> {
    let spec = spec::lookup(field).ok_or(IsoError::UnknownField(field))?;
    let value = decode_field(bytes, pos, spec.shape, dialect, field)?;
    msg.set(field, value)
}

fn encode_field(
    out: &mut Vec<u8>,
    shape: Shape,
    content: Content,
    value: &str,
    dialect: Dialect,
    field: u8,
) -> Result<(), IsoError> {
    match shape {
        Shape::Fixed(len) => {
            if value.len() > len {
                return Err(IsoError::TooLong { field, len: value.len(), max: len });
            }
            let padded = pad(value, len, content);
            out.extend_from_slice(padded.as_bytes());
        }
        Shape::LVar(max) | Shape::LlVar(max) | Shape::LllVar(max) => {
            if value.len() > max {
                return Err(IsoError::TooLong { field, len: value.len(), max });
            }
            write_len(out, shape, value.len(), dialect);
            out.extend_from_slice(value.as_bytes());
        }
    }
    Ok(())
}

fn decode_field(
    bytes: &[u8],
    pos: &mut usize,
    shape: Shape,
    dialect: Dialect,
    field: u8,
) -> Result<String, IsoError> {
    let len = match shape {
        Shape::Fixed(len) => len,
        Shape::LVar(max) | Shape::LlVar(max) | Shape::LllVar(max) => {
            let len = read_len(bytes, pos, shape, dialect)?;
            if len > max {
                return Err(IsoError::TooLong { field, len, max });
            }
            len
        }
    };
    let raw = take(bytes, pos, len, "field value")?;
    String::from_utf8(raw.to_vec()).map_err(|_| IsoError::InvalidField(field, "value is not valid UTF-8"))
}

fn pad(value: &str, len: usize, content: Content) -> String {
    if value.len() == len {
        return value.to_string();
    }
    match content {
        Content::Numeric => format!("{:0>width$}", value, width = len),
        Content::Alphanumeric => format!("{:<width$}", value, width = len),
    }
}

fn len_digits(shape: Shape) -> usize {
    match shape {
        Shape::Fixed(_) => 0,
        Shape::LVar(_) => 1,
        Shape::LlVar(_) => 2,
        Shape::LllVar(_) => 3,
    }
}

fn write_len(out: &mut Vec<u8>, shape: Shape, len: usize, dialect: Dialect) {
    match dialect {
        Dialect::Ascii => {
            let digits = len_digits(shape);
            out.extend_from_slice(format!("{:0>width$}", len, width = digits).as_bytes());
        }
        Dialect::Hex => match shape {
            Shape::LllVar(_) => out.extend_from_slice(&(len as u16).to_be_bytes()),
            _ => out.push(len as u8),
        },
    }
}

fn read_len(bytes: &[u8], pos: &mut usize, shape: Shape, dialect: Dialect) -> Result<usize, IsoError> {
    match dialect {
        Dialect::Ascii => {
            let digits = len_digits(shape);
            let raw = take(bytes, pos, digits, "length indicator")?;
            if !raw.iter().all(|b| b.is_ascii_digit()) {
                return Err(IsoError::InvalidField(0, "non-numeric length indicator"));
            }
            Ok(std::str::from_utf8(raw).unwrap().parse().unwrap())
        }
        Dialect::Hex => match shape {
            Shape::LllVar(_) => {
                let raw = take(bytes, pos, 2, "length indicator")?;
                Ok(u16::from_be_bytes([raw[0], raw[1]]) as usize)
            }
            _ => {
                let raw = take(bytes, pos, 1, "length indicator")?;
                Ok(raw[0] as usize)
            }
        },
    }
}

fn encode_bitmap(out: &mut Vec<u8>, bitmap: &[u8; 8], dialect: Dialect) {
    match dialect {
        Dialect::Ascii => out.extend_from_slice(hex::encode_upper(bitmap).as_bytes()),
        Dialect::Hex => out.extend_from_slice(bitmap),
    }
}

fn decode_bitmap(raw: &[u8], dialect: Dialect) -> Result<[u8; 8], IsoError> {
    match dialect {
        Dialect::Ascii => {
            let s = std::str::from_utf8(raw)
                .map_err(|_| IsoError::InvalidField(0, "bitmap is not valid UTF-8"))?;
            let decoded =
                hex::decode(s).map_err(|_| IsoError::InvalidField(0, "bitmap is not valid hex"))?;
            let mut out = [0u8; 8];
            out.copy_from_slice(&decoded);
            Ok(out)
        }
        Dialect::Hex => {
            let mut out = [0u8; 8];
            out.copy_from_slice(raw);
            Ok(out)
        }
    }
}

fn set_bit(bytes: &mut [u8; 8], pos: u8) {
    let idx = (pos - 1) as usize;
    bytes[idx / 8] |= 0x80 >> (idx % 8);
}

fn get_bit(bytes: &[u8; 8], pos: u8) -> bool {
    let idx = (pos - 1) as usize;
    bytes[idx / 8] & (0x80 >> (idx % 8)) != 0
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize, what: &'static str) -> Result<&'a [u8], IsoError> {
    if *pos + len > bytes.len() {
        return Err(IsoError::ShortBuffer { what, expected: len, got: bytes.len() - *pos });
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut m = Message::new("0200");
        m.set(2, "4111111111111111").unwrap();
        m.set(3, "000000").unwrap();
        m.set(4, "000000010000").unwrap();
        m.set(11, "000123").unwrap();
        m.set(37, "000123000001").unwrap();
        m.set(70, "301").unwrap();
        m
    }

    #[test]
    fn ascii_round_trip() {
        let m = sample();
        let bytes = pack(&m, Dialect::Ascii).unwrap();
        let back = unpack(&bytes, Dialect::Ascii).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn hex_round_trip() {
        let m = sample();
        let bytes = pack(&m, Dialect::Hex).unwrap();
        let back = unpack(&bytes, Dialect::Hex).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn secondary_bitmap_engages_for_field_70() {
        let m = sample();
        let bytes = pack(&m, Dialect::Ascii).unwrap();
        // MTI (4) + primary bitmap (16 hex chars) + secondary bitmap (16 hex chars) = 36
        assert!(bytes.len() > 4 + 16 + 16);
    }

    #[test]
    fn numeric_fixed_field_is_zero_padded() {
        let mut m = Message::new("0800");
        m.set(70, "1").unwrap();
        let bytes = pack(&m, Dialect::Ascii).unwrap();
        let back = unpack(&bytes, Dialect::Ascii).unwrap();
        assert_eq!(back.get(70).unwrap(), "001");
    }

    #[test]
    fn rejects_value_too_long_for_fixed_field() {
        let mut m = Message::new("0800");
        assert!(m.set(39, "123").is_ok());
        assert!(matches!(pack(&m, Dialect::Ascii), Err(IsoError::TooLong { field: 39, .. })));
    }

    #[test]
    fn malformed_mti_is_rejected_on_unpack() {
        let err = unpack(b"08AA0000000000000000", Dialect::Ascii).unwrap_err();
        assert!(matches!(err, IsoError::MalformedMti(_)));
    }

    #[test]
    fn short_buffer_is_detected() {
        let err = unpack(b"0200", Dialect::Ascii).unwrap_err();
        assert!(matches!(err, IsoError::ShortBuffer { .. }));
    }
}
