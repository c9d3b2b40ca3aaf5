//! Endian-aware primitives shared by the ENIP and CIP codecs.
//!
//! Two independent byte-order choices exist in this protocol: the ENIP
//! encapsulation layer and the CIP payload layer each pick their own endianness
//! per [`crate::profile::Profile`]. Every codec threads a [`ByteOrder`] value
//! through instead of hard-coding an endianness, since the wire format
//! genuinely switches at runtime.

use crate::error::{Error, Result};

/// Byte order for a given wire layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn get_u16(self, data: &[u8]) -> Result<u16> {
        let bytes: [u8; 2] = data
            .get(..2)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::Truncated {
                expected: 2,
                actual: data.len(),
            })?;
        Ok(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn get_u32(self, data: &[u8]) -> Result<u32> {
        let bytes: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::Truncated {
                expected: 4,
                actual: data.len(),
            })?;
        Ok(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn get_u64(self, data: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = data
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::Truncated {
                expected: 8,
                actual: data.len(),
            })?;
        Ok(match self {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }

    pub fn put_u16(self, buf: &mut [u8], v: u16) {
        buf[..2].copy_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    pub fn put_u32(self, buf: &mut [u8], v: u32) {
        buf[..4].copy_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    pub fn put_u64(self, buf: &mut [u8], v: u64) {
        buf[..8].copy_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    /// Append without mutating `buf` in place; returns a fresh `Vec`.
    pub fn append_u16(self, buf: &[u8], v: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() + 2);
        out.extend_from_slice(buf);
        out.extend_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
        out
    }

    pub fn append_u32(self, buf: &[u8], v: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() + 4);
        out.extend_from_slice(buf);
        out.extend_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
        out
    }

    pub fn append_u64(self, buf: &[u8], v: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() + 8);
        out.extend_from_slice(buf);
        out.extend_from_slice(&match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_u16() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let buf = order.append_u16(&[], 0xBEEF);
            assert_eq!(order.get_u16(&buf).unwrap(), 0xBEEF);
        }
    }

    #[test]
    fn round_trip_u32() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let buf = order.append_u32(&[], 0xDEAD_BEEF);
            assert_eq!(order.get_u32(&buf).unwrap(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn round_trip_u64() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let buf = order.append_u64(&[], 0x0102_0304_0506_0708);
            assert_eq!(order.get_u64(&buf).unwrap(), 0x0102_0304_0506_0708);
        }
    }

    #[test]
    fn append_does_not_mutate_input() {
        let original = [1u8, 2, 3];
        let out = ByteOrder::Little.append_u16(&original, 9);
        assert_eq!(original, [1, 2, 3]);
        assert_eq!(out, vec![1, 2, 3, 9, 0]);
    }

    #[test]
    fn little_endian_matches_strict_profile_encoding() {
        let buf = ByteOrder::Little.append_u16(&[], 0x1234);
        assert_eq!(buf, vec![0x34, 0x12]);
    }

    #[test]
    fn truncated_get_is_an_error() {
        assert!(matches!(
            ByteOrder::Little.get_u32(&[1, 2]),
            Err(Error::Truncated { expected: 4, actual: 2 })
        ));
    }
}
