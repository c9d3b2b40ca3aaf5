//! ENIP encapsulation codec: the 24-byte header, CPF items, and the
//! command-specific body layouts built on top of them.
//!
//! The header's endianness is a per-profile choice (`strict_odva` is
//! little-endian, `legacy_compat` is big-endian), so encode/decode thread a
//! [`ByteOrder`] through rather than relying on a `#[repr(C)]` cast.

use crate::byte::ByteOrder;
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 24;

pub mod command {
    pub const REGISTER_SESSION: u16 = 0x0065;
    pub const UNREGISTER_SESSION: u16 = 0x0066;
    pub const LIST_IDENTITY: u16 = 0x0063;
    pub const LIST_SERVICES: u16 = 0x0004;
    pub const LIST_INTERFACES: u16 = 0x0064;
    pub const SEND_RR_DATA: u16 = 0x006F;
    pub const SEND_UNIT_DATA: u16 = 0x0070;

    pub fn is_known(command: u16) -> bool {
        matches!(
            command,
            REGISTER_SESSION
                | UNREGISTER_SESSION
                | LIST_IDENTITY
                | LIST_SERVICES
                | LIST_INTERFACES
                | SEND_RR_DATA
                | SEND_UNIT_DATA
        )
    }
}

pub mod status {
    pub const SUCCESS: u32 = 0x0000;
    pub const INVALID_COMMAND: u32 = 0x0001;
    pub const INSUFFICIENT_MEMORY: u32 = 0x0068;
    pub const INVALID_SESSION_HANDLE: u32 = 0x0064;
    pub const INVALID_LENGTH: u32 = 0x0065;
    pub const UNSUPPORTED_PROTOCOL_REVISION: u32 = 0x0069;
}

/// A decoded/to-be-encoded ENIP encapsulation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encapsulation {
    pub command: u16,
    pub session_id: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub options: u32,
    pub data: Vec<u8>,
}

impl Encapsulation {
    pub fn request(command: u16, session_id: u32, data: Vec<u8>) -> Self {
        Self {
            command,
            session_id,
            status: status::SUCCESS,
            sender_context: [0; 8],
            options: 0,
            data,
        }
    }

    pub fn reply(&self, status: u32, data: Vec<u8>) -> Self {
        Self {
            command: self.command,
            session_id: self.session_id,
            status,
            sender_context: self.sender_context,
            options: 0,
            data,
        }
    }
}

/// Encode a frame with the given encapsulation-layer byte order.
pub fn encode(order: ByteOrder, encap: &Encapsulation) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + encap.data.len());
    out = order.append_u16(&out, encap.command);
    out = order.append_u16(&out, encap.data.len() as u16);
    out = order.append_u32(&out, encap.session_id);
    out = order.append_u32(&out, encap.status);
    out.extend_from_slice(&encap.sender_context);
    out = order.append_u32(&out, encap.options);
    out.extend_from_slice(&encap.data);
    out
}

/// Decode a frame; `data` must be exactly one frame (`24 + length` bytes).
pub fn decode(order: ByteOrder, data: &[u8]) -> Result<Encapsulation> {
    if data.len() < HEADER_LEN {
        return Err(Error::Truncated {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let command = order.get_u16(&data[0..2])?;
    let length = order.get_u16(&data[2..4])? as usize;
    let session_id = order.get_u32(&data[4..8])?;
    let status = order.get_u32(&data[8..12])?;
    let mut sender_context = [0u8; 8];
    sender_context.copy_from_slice(&data[12..20]);
    let options = order.get_u32(&data[20..24])?;
    if data.len() != HEADER_LEN + length {
        return Err(Error::Framing(format!(
            "length field {length} does not match frame size {}",
            data.len() - HEADER_LEN
        )));
    }
    Ok(Encapsulation {
        command,
        session_id,
        status,
        sender_context,
        options,
        data: data[HEADER_LEN..].to_vec(),
    })
}

/// A Common Packet Format item, carried inside SendRRData/SendUnitData.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
    pub type_id: u16,
    pub data: Vec<u8>,
}

pub mod cpf_type {
    pub const NULL_ADDRESS: u16 = 0x0000;
    pub const CONNECTED_ADDRESS: u16 = 0x00A1;
    pub const UNCONNECTED_DATA: u16 = 0x00B2;
    pub const CONNECTED_DATA: u16 = 0x00B1;
    pub const SEQUENCED_ADDRESS: u16 = 0x8002;
}

pub fn encode_cpf_items(order: ByteOrder, items: &[CpfItem]) -> Vec<u8> {
    let mut out = order.append_u16(&[], items.len() as u16);
    for item in items {
        out = order.append_u16(&out, item.type_id);
        out = order.append_u16(&out, item.data.len() as u16);
        out.extend_from_slice(&item.data);
    }
    out
}

pub fn parse_cpf_items(order: ByteOrder, data: &[u8]) -> Result<Vec<CpfItem>> {
    let count = order.get_u16(data)? as usize;
    let mut pos = 2;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let type_id = order.get_u16(
            data.get(pos..pos + 2)
                .ok_or_else(|| Error::Cpf("truncated item header".into()))?,
        )?;
        let len = order.get_u16(
            data.get(pos + 2..pos + 4)
                .ok_or_else(|| Error::Cpf("truncated item header".into()))?,
        )? as usize;
        let start = pos + 4;
        let end = start + len;
        let item_data = data
            .get(start..end)
            .ok_or_else(|| Error::Cpf("truncated item payload".into()))?
            .to_vec();
        items.push(CpfItem {
            type_id,
            data: item_data,
        });
        pos = end;
    }
    Ok(items)
}

/// Find the first item of a given type.
pub fn find_item(items: &[CpfItem], type_id: u16) -> Option<&CpfItem> {
    items.iter().find(|i| i.type_id == type_id)
}

/// Build the body for a SendRRData/SendUnitData request.
///
/// When `use_cpf` is set, wraps `cip_payload` in CPF items (`address_item` +
/// the data item of `data_type_id`). Otherwise falls back to the legacy,
/// CPF-less layout: `interface_handle(4) + timeout(2) + cip_payload`.
pub fn encode_rr_or_unit_body(
    order: ByteOrder,
    use_cpf: bool,
    timeout: u16,
    address_item: CpfItem,
    data_type_id: u16,
    cip_payload: &[u8],
) -> Vec<u8> {
    let mut out = order.append_u32(&[], 0); // interface_handle
    out = order.append_u16(&out, timeout);
    if use_cpf {
        let items = vec![
            address_item,
            CpfItem {
                type_id: data_type_id,
                data: cip_payload.to_vec(),
            },
        ];
        out.extend_from_slice(&encode_cpf_items(order, &items));
    } else {
        out.extend_from_slice(cip_payload);
    }
    out
}

/// Extract the CIP payload (and, for unit data, the connection ID) from a
/// SendRRData/SendUnitData body, honoring the profile's CPF tolerance.
pub struct ParsedRrBody {
    pub cip_payload: Vec<u8>,
    pub connection_id: Option<u32>,
}

pub fn decode_rr_or_unit_body(
    order: ByteOrder,
    use_cpf: bool,
    cpf_tolerant: bool,
    data: &[u8],
) -> Result<ParsedRrBody> {
    if data.len() < 6 {
        return Err(Error::Framing("SendRRData/SendUnitData body too short".into()));
    }
    let rest = &data[6..]; // skip interface_handle + timeout
    if !use_cpf {
        return Ok(ParsedRrBody {
            cip_payload: rest.to_vec(),
            connection_id: None,
        });
    }
    match parse_cpf_items(order, rest) {
        Ok(items) => {
            let connection_id = find_item(&items, cpf_type::CONNECTED_ADDRESS)
                .and_then(|item| order.get_u32(&item.data).ok());
            let cip_payload = find_item(&items, cpf_type::UNCONNECTED_DATA)
                .or_else(|| find_item(&items, cpf_type::CONNECTED_DATA))
                .map(|item| item.data.clone())
                .ok_or_else(|| Error::Cpf("no data item present".into()))?;
            Ok(ParsedRrBody {
                cip_payload,
                connection_id,
            })
        }
        Err(_) if cpf_tolerant => Ok(ParsedRrBody {
            cip_payload: rest.to_vec(),
            connection_id: None,
        }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_header_little_endian() {
        let encap = Encapsulation {
            command: command::REGISTER_SESSION,
            session_id: 0x1234_5678,
            status: 0,
            sender_context: [1, 2, 3, 4, 5, 6, 7, 8],
            options: 0,
            data: vec![1, 0, 0, 0],
        };
        let bytes = encode(ByteOrder::Little, &encap);
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        assert_eq!(decode(ByteOrder::Little, &bytes).unwrap(), encap);
    }

    #[test]
    fn register_session_reply_matches_canonical_bytes() {
        // Scenario: RegisterSession, sender_context 01..08, session_id assigned.
        let encap = Encapsulation {
            command: command::REGISTER_SESSION,
            session_id: 0x0000_0001,
            status: 0,
            sender_context: [1, 2, 3, 4, 5, 6, 7, 8],
            options: 0,
            data: vec![1, 0, 0, 0],
        };
        let bytes = encode(ByteOrder::Little, &encap);
        let expected = [
            0x65, 0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
            0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn length_mismatch_is_a_framing_error() {
        let mut bytes = encode(
            ByteOrder::Little,
            &Encapsulation::request(command::LIST_IDENTITY, 0, vec![1, 2]),
        );
        bytes.pop();
        assert!(matches!(decode(ByteOrder::Little, &bytes), Err(Error::Framing(_))));
    }

    #[test]
    fn cpf_items_round_trip() {
        let items = vec![
            CpfItem {
                type_id: cpf_type::NULL_ADDRESS,
                data: vec![],
            },
            CpfItem {
                type_id: cpf_type::UNCONNECTED_DATA,
                data: vec![0x0E, 0x01, 0x02],
            },
        ];
        let bytes = encode_cpf_items(ByteOrder::Little, &items);
        assert_eq!(parse_cpf_items(ByteOrder::Little, &bytes).unwrap(), items);
    }

    #[test]
    fn legacy_layout_recovered_in_tolerant_mode() {
        // S6: legacy_compat sends {interface(4)=0, timeout(2), cip...} with no CPF.
        let mut body = vec![0, 0, 0, 0, 0, 0]; // interface + timeout
        body.extend_from_slice(&[0x0E, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01]);
        let parsed = decode_rr_or_unit_body(ByteOrder::Big, false, true, &body).unwrap();
        assert_eq!(parsed.cip_payload, vec![0x0E, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01]);
    }
}
