//! CIP EPATH encoding and decoding.
//!
//! An EPATH is a sequence of 2- or 3-byte segments identifying a class,
//! instance, and attribute, or a symbolic (ANSI) tag name. [`LogicalPath`]
//! models the logical contents; [`encode`]/[`decode`] convert to and from the
//! segment byte sequence.

use crate::error::{Error, Result};

pub const SEG_CLASS_8: u8 = 0x20;
pub const SEG_CLASS_16: u8 = 0x21;
pub const SEG_INSTANCE_8: u8 = 0x24;
pub const SEG_INSTANCE_16: u8 = 0x25;
pub const SEG_ATTRIBUTE_8: u8 = 0x30;
pub const SEG_ATTRIBUTE_16: u8 = 0x31;
pub const SEG_SYMBOLIC: u8 = 0x91;

/// A logical CIP path: class/instance/attribute, or a symbolic tag name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalPath {
    pub class: Option<u16>,
    pub instance: Option<u16>,
    pub attribute: Option<u16>,
    pub name: Option<String>,
}

impl LogicalPath {
    pub fn class_instance_attribute(class: u16, instance: u16, attribute: u16) -> Self {
        Self {
            class: Some(class),
            instance: Some(instance),
            attribute: Some(attribute),
            name: None,
        }
    }

    pub fn class_instance(class: u16, instance: u16) -> Self {
        Self {
            class: Some(class),
            instance: Some(instance),
            attribute: None,
            name: None,
        }
    }

    pub fn symbolic(name: impl Into<String>) -> Self {
        Self {
            class: None,
            instance: None,
            attribute: None,
            name: Some(name.into()),
        }
    }
}

/// Encode `name` as a symbolic (0x91) segment, padded to an even length.
pub fn build_symbolic(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(2 + bytes.len() + 1);
    out.push(SEG_SYMBOLIC);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    if bytes.len() % 2 != 0 {
        out.push(0);
    }
    out
}

/// Encode a segment for a 16-bit-capable field, choosing the 8-bit form when
/// the value fits.
fn encode_field(tag_8: u8, tag_16: u8, value: u16, out: &mut Vec<u8>) {
    if value <= 0xFF {
        out.push(tag_8);
        out.push(value as u8);
    } else {
        out.push(tag_16);
        out.push(0); // pad byte before the 16-bit value, per ODVA segment layout
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Encode a [`LogicalPath`] into its EPATH byte sequence.
///
/// Symbolic paths emit only the symbolic segment. Logical paths always emit
/// an attribute segment, `0x30 0x00` when the attribute is absent, matching
/// the wire contract that decoders downstream rely on.
pub fn encode(path: &LogicalPath) -> Vec<u8> {
    if let Some(name) = &path.name {
        return build_symbolic(name);
    }
    let mut out = Vec::new();
    if let Some(class) = path.class {
        encode_field(SEG_CLASS_8, SEG_CLASS_16, class, &mut out);
    }
    if let Some(instance) = path.instance {
        encode_field(SEG_INSTANCE_8, SEG_INSTANCE_16, instance, &mut out);
    }
    out.push(SEG_ATTRIBUTE_8);
    out.push(path.attribute.unwrap_or(0) as u8);
    out
}

/// Decode an EPATH byte sequence into a [`LogicalPath`].
pub fn decode(data: &[u8]) -> Result<LogicalPath> {
    let mut path = LogicalPath::default();
    let mut pos = 0;
    while pos < data.len() {
        let tag = data[pos];
        match tag {
            SEG_CLASS_8 | SEG_INSTANCE_8 | SEG_ATTRIBUTE_8 => {
                let value = *data
                    .get(pos + 1)
                    .ok_or_else(|| Error::InvalidPath("truncated 8-bit segment".into()))?
                    as u16;
                assign(&mut path, tag, value);
                pos += 2;
            }
            SEG_CLASS_16 | SEG_INSTANCE_16 | SEG_ATTRIBUTE_16 => {
                let bytes = data
                    .get(pos + 2..pos + 4)
                    .ok_or_else(|| Error::InvalidPath("truncated 16-bit segment".into()))?;
                let value = u16::from_le_bytes([bytes[0], bytes[1]]);
                assign(&mut path, tag, value);
                pos += 4;
            }
            SEG_SYMBOLIC => {
                let len = *data
                    .get(pos + 1)
                    .ok_or_else(|| Error::InvalidPath("truncated symbolic length".into()))?
                    as usize;
                let start = pos + 2;
                let end = start + len;
                let name_bytes = data
                    .get(start..end)
                    .ok_or_else(|| Error::InvalidPath("truncated symbolic name".into()))?;
                path.name = Some(
                    std::str::from_utf8(name_bytes)
                        .map_err(|e| Error::InvalidPath(format!("non-UTF8 tag name: {e}")))?
                        .to_string(),
                );
                pos = end + (len % 2);
            }
            other => {
                return Err(Error::InvalidPath(format!(
                    "unknown EPATH segment type 0x{other:02X}"
                )));
            }
        }
    }
    Ok(path)
}

fn assign(path: &mut LogicalPath, tag: u8, value: u16) {
    match tag {
        SEG_CLASS_8 | SEG_CLASS_16 => path.class = Some(value),
        SEG_INSTANCE_8 | SEG_INSTANCE_16 => path.instance = Some(value),
        SEG_ATTRIBUTE_8 | SEG_ATTRIBUTE_16 => path.attribute = Some(value),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_logical_path() {
        let path = LogicalPath::class_instance_attribute(0x01, 1, 7);
        let encoded = encode(&path);
        assert_eq!(encoded, vec![0x20, 0x01, 0x24, 0x01, 0x30, 0x07]);
        assert_eq!(decode(&encoded).unwrap(), path);
    }

    #[test]
    fn attribute_segment_always_emitted() {
        let path = LogicalPath::class_instance(0x04, 0x65);
        let encoded = encode(&path);
        assert_eq!(&encoded[encoded.len() - 2..], &[0x30, 0x00]);
    }

    #[test]
    fn sixteen_bit_class_segment() {
        let path = LogicalPath::class_instance_attribute(0x0100, 1, 0);
        let encoded = encode(&path);
        assert_eq!(&encoded[..4], &[0x21, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn symbolic_segment_pads_to_even_length() {
        // "MyTag" is 5 bytes -> one pad byte, matching the canonical example.
        let encoded = build_symbolic("MyTag");
        assert_eq!(encoded, vec![0x91, 0x05, b'M', b'y', b'T', b'a', b'g', 0x00]);
    }

    #[test]
    fn symbolic_round_trip() {
        let path = LogicalPath::symbolic("MyTag");
        let encoded = encode(&path);
        assert_eq!(decode(&encoded).unwrap(), path);
    }

    #[test]
    fn unknown_segment_type_is_an_error() {
        assert!(decode(&[0x99, 0x00]).is_err());
    }

    #[test]
    fn truncated_segment_is_an_error() {
        assert!(decode(&[0x20]).is_err());
    }
}
