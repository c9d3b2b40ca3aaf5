//! PCCC tunnel: Allen-Bradley legacy protocol carried inside CIP service
//! 0x4B on class 0x67.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;

#[derive(Debug, Clone)]
pub struct PcccDataTable {
    pub file_type: u8,
    pub file_number: u8,
    pub elements: Vec<u8>,
}

/// Command codes this tunnel understands within the PCCC envelope.
mod pccc_cmd {
    pub const TYPED_READ: u8 = 0xA2;
    pub const TYPED_WRITE: u8 = 0xAA;
    pub const DIAGNOSTIC_READ: u8 = 0x06;
    pub const ECHO: u8 = 0x4B;
}

pub struct PcccHandler {
    tables: Mutex<HashMap<(u8, u8), PcccDataTable>>,
}

impl PcccHandler {
    pub fn new(tables: Vec<PcccDataTable>) -> Self {
        Self {
            tables: Mutex::new(
                tables
                    .into_iter()
                    .map(|t| ((t.file_type, t.file_number), t))
                    .collect(),
            ),
        }
    }
}

/// PCCC request envelope fields beyond the common header.
struct PcccEnvelope<'a> {
    cmd: u8,
    fnc: u8,
    data: &'a [u8],
    header: &'a [u8],
}

fn parse_envelope(payload: &[u8]) -> Option<PcccEnvelope<'_>> {
    // req_id(1) vendor(2) serial(4) cmd(1) sts(1) tns(2) [fnc(1) data...]
    if payload.len() < 11 {
        return None;
    }
    let header = &payload[..9];
    let cmd = payload[7];
    let fnc = *payload.get(9).unwrap_or(&0);
    let data = payload.get(10..).unwrap_or(&[]);
    Some(PcccEnvelope { cmd, fnc, data, header })
}

impl Handler for PcccHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        if req.service != service::PCCC_EXECUTE {
            return Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false));
        }
        let Some(env) = parse_envelope(&req.payload) else {
            return Ok((Response::error(req.service, status::INVALID_EMBEDDED), true));
        };

        let mut out = env.header.to_vec();
        match env.cmd {
            pccc_cmd::TYPED_READ => {
                // data: byte_size(1) file_number(1) file_type(1) element(1) sub_element(1)
                if env.data.len() < 5 {
                    return Ok(envelope_error(out, status::PCCC_ILLEGAL_ADDRESS));
                }
                let byte_size = env.data[0] as usize;
                let file_number = env.data[1];
                let file_type = env.data[2];
                let element = env.data[3] as usize;
                let tables = self.tables.lock().unwrap();
                let Some(table) = tables.get(&(file_type, file_number)) else {
                    return Ok(envelope_error(out, status::PCCC_ILLEGAL_ADDRESS));
                };
                let start = element * byte_size.max(1);
                let Some(slice) = table.elements.get(start..start + byte_size) else {
                    return Ok(envelope_error(out, status::PCCC_ILLEGAL_ADDRESS));
                };
                out.push(env.cmd);
                out.push(0x00); // sts success
                out.extend_from_slice(slice);
                Ok((Response::ok(req.service, out), true))
            }
            pccc_cmd::TYPED_WRITE => {
                if env.data.len() < 4 {
                    return Ok(envelope_error(out, status::PCCC_ILLEGAL_ADDRESS));
                }
                let byte_size = env.data[0] as usize;
                let file_number = env.data[1];
                let file_type = env.data[2];
                let element = env.data[3] as usize;
                let value = env.data.get(4..4 + byte_size).unwrap_or(&[]);
                let mut tables = self.tables.lock().unwrap();
                let Some(table) = tables.get_mut(&(file_type, file_number)) else {
                    return Ok(envelope_error(out, status::PCCC_ILLEGAL_ADDRESS));
                };
                let start = element * byte_size.max(1);
                let end = start + value.len();
                if table.elements.len() < end {
                    table.elements.resize(end, 0);
                }
                table.elements[start..end].copy_from_slice(value);
                out.push(env.cmd);
                out.push(0x00);
                Ok((Response::ok(req.service, out), true))
            }
            pccc_cmd::DIAGNOSTIC_READ => {
                out.push(env.cmd);
                out.push(0x00);
                out.extend(std::iter::repeat(0u8).take(20));
                Ok((Response::ok(req.service, out), true))
            }
            pccc_cmd::ECHO => {
                out.push(env.cmd);
                out.push(0x00);
                out.push(env.fnc);
                out.extend_from_slice(env.data);
                Ok((Response::ok(req.service, out), true))
            }
            _ => {
                out.push(env.cmd);
                out.push(status::PCCC_ILLEGAL_ADDRESS);
                Ok((Response::ok(req.service, out), true))
            }
        }
    }
}

fn envelope_error(mut header: Vec<u8>, sts: u8) -> (Response, bool) {
    header.push(0xA2);
    header.push(sts);
    (Response::ok(service::PCCC_EXECUTE, header), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epath::LogicalPath;

    fn envelope(cmd: u8, fnc_and_data: Vec<u8>) -> Vec<u8> {
        let mut out = vec![0u8; 7]; // req_id, vendor(2), serial(4)
        out.push(cmd);
        out.push(0); // sts
        out.extend_from_slice(&[0, 0]); // tns
        out.extend_from_slice(&fnc_and_data);
        out
    }

    fn req(payload: Vec<u8>) -> Request {
        Request::new(service::PCCC_EXECUTE, LogicalPath::class_instance(0x67, 1), payload)
    }

    #[test]
    fn typed_read_returns_element_bytes() {
        let handler = PcccHandler::new(vec![PcccDataTable {
            file_type: 0x89,
            file_number: 7,
            elements: vec![0xAA, 0xBB, 0xCC, 0xDD],
        }]);
        let payload = envelope(0xA2, vec![0x00, 2, 0x89, 7, 1, 0]);
        let (resp, handled) = handler.handle(&req(payload)).unwrap();
        assert!(handled);
        assert_eq!(resp.status, status::SUCCESS);
        assert!(resp.payload.ends_with(&[0xAA, 0xBB]));
    }

    #[test]
    fn echo_returns_request_data() {
        let handler = PcccHandler::new(vec![]);
        let payload = envelope(0x4B, vec![0x01, 1, 2, 3]);
        let (resp, _) = handler.handle(&req(payload)).unwrap();
        assert!(resp.payload.ends_with(&[1, 2, 3]));
    }

    #[test]
    fn diagnostic_read_returns_twenty_zero_bytes() {
        let handler = PcccHandler::new(vec![]);
        let payload = envelope(0x06, vec![]);
        let (resp, _) = handler.handle(&req(payload)).unwrap();
        assert_eq!(resp.payload.len(), 9 + 2 + 20);
    }

    #[test]
    fn invalid_address_gives_illegal_address_status() {
        let handler = PcccHandler::new(vec![]);
        let payload = envelope(0xA2, vec![2, 99, 99, 0, 0]);
        let (resp, _) = handler.handle(&req(payload)).unwrap();
        assert_eq!(resp.payload[10], status::PCCC_ILLEGAL_ADDRESS);
    }
}
