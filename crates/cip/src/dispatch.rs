//! Stream framer and command dispatch.
//!
//! The framer walks a byte buffer, peels off complete frames, and hands back
//! whatever trailing bytes are not yet a full frame. A TCP stream has no
//! reliable framing contract, so on a bad command byte the framer resyncs a
//! byte at a time rather than erroring out.

use std::future::Future;
use std::pin::Pin;

use crate::byte::ByteOrder;
use crate::cip::{self, Request, Response};
use crate::enip::{self, command, Encapsulation};
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::profile::{self, ForwardCloseMode, Profile};
use crate::registry::ServiceRegistry;
use crate::session::{ConnectionTable, SessionTable};
use crate::validator;

/// Feed accumulated bytes in, get back complete frames plus the unconsumed
/// tail. Call sites keep the tail in a growing buffer across reads.
pub struct StreamFramer {
    order: ByteOrder,
}

impl StreamFramer {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    /// Extract every complete frame from `buf`, returning them along with
    /// the number of leading bytes consumed (including any resync skips).
    pub fn extract_frames(&self, buf: &[u8]) -> (Vec<Encapsulation>, usize) {
        let mut frames = Vec::new();
        let mut pos = 0;
        'outer: loop {
            // Resync: skip bytes until the next 2 look like a known command.
            while pos + 2 <= buf.len() {
                let candidate = self.order.get_u16(&buf[pos..pos + 2]).unwrap_or(0xFFFF);
                if command::is_known(candidate) {
                    break;
                }
                pos += 1;
            }
            if pos + enip::HEADER_LEN > buf.len() {
                break 'outer;
            }
            let length = match self.order.get_u16(&buf[pos + 2..pos + 4]) {
                Ok(l) => l as usize,
                Err(_) => break 'outer,
            };
            let frame_len = enip::HEADER_LEN + length;
            if pos + frame_len > buf.len() {
                break 'outer;
            }
            match enip::decode(self.order, &buf[pos..pos + frame_len]) {
                Ok(frame) => {
                    frames.push(frame);
                    pos += frame_len;
                }
                Err(_) => {
                    // Header looked plausible but didn't decode; treat the
                    // command byte as noise and keep resyncing.
                    pos += 1;
                }
            }
        }
        (frames, pos)
    }
}

/// Ties the session/connection tables, the policy validator, and the
/// service handler registry into one command router for incoming ENIP
/// commands.
pub struct DispatchEngine {
    sessions: SessionTable,
    connections: ConnectionTable,
    registry: ServiceRegistry,
    handlers: HandlerRegistry,
}

impl DispatchEngine {
    pub fn new(sessions: SessionTable, connections: ConnectionTable, registry: ServiceRegistry, handlers: HandlerRegistry) -> Self {
        Self {
            sessions,
            connections,
            registry,
            handlers,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Route one decoded encapsulation frame to a reply frame. Returns
    /// `None` for commands (UnregisterSession) that get no reply.
    pub async fn handle(&self, remote_ip: &str, encap: Encapsulation) -> Result<Option<Encapsulation>> {
        match encap.command {
            command::REGISTER_SESSION => {
                let session_id = self.sessions.register(remote_ip).await?;
                Ok(Some(Encapsulation {
                    command: encap.command,
                    session_id,
                    status: enip::status::SUCCESS,
                    sender_context: encap.sender_context,
                    options: 0,
                    data: vec![1, 0, 0, 0], // protocol version 1, options 0
                }))
            }
            command::UNREGISTER_SESSION => {
                self.sessions.unregister(encap.session_id).await;
                self.connections.drop_for_session(encap.session_id).await;
                Ok(None)
            }
            command::LIST_IDENTITY | command::LIST_SERVICES | command::LIST_INTERFACES => {
                Ok(Some(encap.reply(enip::status::SUCCESS, Vec::new())))
            }
            command::SEND_RR_DATA | command::SEND_UNIT_DATA => {
                self.handle_send_data(remote_ip, &encap).await
            }
            _ => Ok(Some(encap.reply(enip::status::INVALID_COMMAND, Vec::new()))),
        }
    }

    async fn handle_send_data(&self, remote_ip: &str, encap: &Encapsulation) -> Result<Option<Encapsulation>> {
        let profile = profile::current();

        let session = match self.sessions.get(encap.session_id).await {
            Ok(s) => s,
            Err(_) => return Ok(Some(encap.reply(enip::status::INVALID_SESSION_HANDLE, Vec::new()))),
        };

        let parsed = match enip::decode_rr_or_unit_body(
            profile.enip_byte_order,
            profile.use_cpf,
            !profile.cpf_policy.strict,
            &encap.data,
        ) {
            Ok(p) => p,
            Err(_) => return Ok(Some(encap.reply(enip::status::INVALID_LENGTH, Vec::new()))),
        };

        if let Some(conn_id) = parsed.connection_id {
            if !self.connections.is_active(conn_id, session.id).await {
                return Ok(Some(encap.reply(enip::status::INVALID_SESSION_HANDLE, Vec::new())));
            }
            self.connections.touch(conn_id).await;
        }

        let req = match cip::decode_request(profile.include_cip_path_size, &parsed.cip_payload) {
            Ok(r) => r,
            Err(_) => return Ok(Some(encap.reply(enip::status::INVALID_LENGTH, Vec::new()))),
        };

        let resp = self.dispatch_cip_request(&profile, session.id, remote_ip, req).await?;
        let resp_bytes = cip::encode_response(profile.include_cip_resp_reserved, &resp);

        let (address_item, data_type_id) = match parsed.connection_id {
            Some(id) => (
                enip::CpfItem {
                    type_id: enip::cpf_type::CONNECTED_ADDRESS,
                    data: profile.enip_byte_order.append_u32(&[], id),
                },
                enip::cpf_type::CONNECTED_DATA,
            ),
            None => (
                enip::CpfItem {
                    type_id: enip::cpf_type::NULL_ADDRESS,
                    data: Vec::new(),
                },
                enip::cpf_type::UNCONNECTED_DATA,
            ),
        };
        let body = enip::encode_rr_or_unit_body(profile.enip_byte_order, profile.use_cpf, 0, address_item, data_type_id, &resp_bytes);

        Ok(Some(Encapsulation {
            command: encap.command,
            session_id: encap.session_id,
            status: enip::status::SUCCESS,
            sender_context: encap.sender_context,
            options: 0,
            data: body,
        }))
    }

    /// Resolve one CIP request to a response, handling the Connection
    /// Manager services and MultipleService inline before falling through
    /// to the object personality registry. Boxed because UnconnectedSend
    /// and MultipleService both recurse back into this same routing.
    fn dispatch_cip_request<'a>(
        &'a self,
        profile: &'a Profile,
        session_id: u32,
        remote_addr: &'a str,
        req: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>> {
        Box::pin(async move {
            if validator::validate_request(profile, &self.registry, &req).is_err() {
                return Ok(Response::error(req.service, cip::status::INVALID_PARAMETER));
            }

            let class = req.path.class.unwrap_or(0);
            if class == 0x06 && req.service == cip::service::FORWARD_OPEN {
                return self.handle_forward_open(session_id, remote_addr, &req).await;
            }
            if class == 0x06 && req.service == cip::service::FORWARD_CLOSE {
                return Ok(self.handle_forward_close(profile, &req).await);
            }
            if class == 0x06 && req.service == cip::service::UNCONNECTED_SEND {
                return self.handle_unconnected_send(profile, session_id, remote_addr, &req).await;
            }
            if class == 0x02 && req.service == cip::service::MULTIPLE_SERVICE {
                return self.handle_multiple_service(profile, session_id, remote_addr, &req).await;
            }
            self.handlers.dispatch(profile.cip_policy.default_unsupported_status, &req)
        })
    }

    async fn handle_forward_open(&self, session_id: u32, remote_addr: &str, req: &Request) -> Result<Response> {
        let payload = &req.payload;
        if payload.len() < 18 {
            return Ok(Response::error(cip::service::FORWARD_OPEN, cip::status::CONNECTION_FAILURE));
        }
        let conn_serial = ByteOrder::Little.get_u16(&payload[10..12]).unwrap_or(0);
        let orig_vendor = ByteOrder::Little.get_u16(&payload[12..14]).unwrap_or(0);
        let orig_serial = ByteOrder::Little.get_u32(&payload[14..18]).unwrap_or(0);
        let o_to_t_rpi = payload.get(22..26).and_then(|b| ByteOrder::Little.get_u32(b).ok()).unwrap_or(0);
        let t_to_o_rpi = payload.get(28..32).and_then(|b| ByteOrder::Little.get_u32(b).ok()).unwrap_or(0);

        let (o_to_t_id, t_to_o_id) = self.connections.allocate_pair();
        self.connections.track(o_to_t_id, session_id, remote_addr).await;
        self.connections.track(t_to_o_id, session_id, remote_addr).await;

        let mut out = Vec::with_capacity(26);
        out.extend_from_slice(&o_to_t_id.to_le_bytes());
        out.extend_from_slice(&t_to_o_id.to_le_bytes());
        out.extend_from_slice(&conn_serial.to_le_bytes());
        out.extend_from_slice(&orig_vendor.to_le_bytes());
        out.extend_from_slice(&orig_serial.to_le_bytes());
        out.extend_from_slice(&o_to_t_rpi.to_le_bytes());
        out.extend_from_slice(&t_to_o_rpi.to_le_bytes());
        out.push(0); // application reply size, in words
        out.push(0); // reserved
        Ok(Response::ok(cip::service::FORWARD_OPEN, out))
    }

    /// Closes whatever connection the request's marker/offset scheme
    /// resolves to. This harness does not keep a serial/vendor/serial ->
    /// connection-id index, so unlike a real target it always reports
    /// success; the point is exercising the close path, not rejecting
    /// mismatched triples.
    async fn handle_forward_close(&self, profile: &Profile, req: &Request) -> Response {
        let payload = &req.payload;
        let target = match profile.cip_policy.forward_close_mode {
            ForwardCloseMode::MarkerScan => payload
                .iter()
                .position(|&b| b == 0x34)
                .and_then(|pos| payload.get(pos + 1..pos + 5))
                .and_then(|b| ByteOrder::Little.get_u32(b).ok()),
            ForwardCloseMode::StrictOffset => payload.get(2..6).and_then(|b| ByteOrder::Little.get_u32(b).ok()),
        };
        if let Some(conn_id) = target {
            self.connections.untrack(conn_id).await;
        }
        let mut out = payload.get(..8).unwrap_or(&[0; 8]).to_vec();
        out.push(0); // application reply size
        out.push(0); // reserved
        Response::ok(cip::service::FORWARD_CLOSE, out)
    }

    async fn handle_unconnected_send(&self, profile: &Profile, session_id: u32, remote_addr: &str, req: &Request) -> Result<Response> {
        let unc = match cip::decode_unconnected_send(&req.payload) {
            Ok(u) => u,
            Err(_) => return Ok(Response::error(req.service, cip::status::INVALID_EMBEDDED)),
        };
        let embedded = match cip::decode_request(profile.include_cip_path_size, &unc.embedded) {
            Ok(r) => r,
            Err(_) => return Ok(Response::error(req.service, cip::status::INVALID_EMBEDDED)),
        };
        self.dispatch_cip_request(profile, session_id, remote_addr, embedded).await
    }

    async fn handle_multiple_service(&self, profile: &Profile, session_id: u32, remote_addr: &str, req: &Request) -> Result<Response> {
        let requests = match cip::decode_multiple_service_request(&req.payload) {
            Ok(r) => r,
            Err(_) => return Ok(Response::error(req.service, cip::status::INVALID_EMBEDDED)),
        };
        let mut encoded_responses = Vec::with_capacity(requests.len());
        for raw in requests {
            let sub_req = match cip::decode_request(profile.include_cip_path_size, &raw) {
                Ok(r) => r,
                Err(_) => {
                    encoded_responses.push(cip::encode_response(
                        profile.include_cip_resp_reserved,
                        &Response::error(0, cip::status::INVALID_EMBEDDED),
                    ));
                    continue;
                }
            };
            let service = sub_req.service;
            let sub_resp = match self.dispatch_cip_request(profile, session_id, remote_addr, sub_req).await {
                Ok(r) => r,
                Err(_) => Response::error(service, cip::status::CONNECTION_FAILURE),
            };
            encoded_responses.push(cip::encode_response(profile.include_cip_resp_reserved, &sub_resp));
        }
        Ok(Response::ok(
            req.service,
            cip::encode_multiple_service_response(&encoded_responses),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enip::Encapsulation;

    fn frame(command: u16, data: Vec<u8>) -> Vec<u8> {
        enip::encode(ByteOrder::Little, &Encapsulation::request(command, 0, data))
    }

    #[test]
    fn extracts_single_frame() {
        let bytes = frame(command::LIST_IDENTITY, vec![]);
        let framer = StreamFramer::new(ByteOrder::Little);
        let (frames, consumed) = framer.extract_frames(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn leaves_partial_frame_for_next_read() {
        let bytes = frame(command::LIST_IDENTITY, vec![1, 2, 3, 4]);
        let partial = &bytes[..bytes.len() - 2];
        let framer = StreamFramer::new(ByteOrder::Little);
        let (frames, consumed) = framer.extract_frames(partial);
        assert!(frames.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        // S7: garbage bytes before a complete RegisterSession frame.
        let mut bytes = vec![0xDE, 0xAD, 0xBE];
        bytes.extend_from_slice(&frame(command::REGISTER_SESSION, vec![1, 0, 0, 0]));
        let framer = StreamFramer::new(ByteOrder::Little);
        let (frames, consumed) = framer.extract_frames(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, command::REGISTER_SESSION);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn splits_concatenated_frames_correctly() {
        let mut bytes = frame(command::LIST_IDENTITY, vec![]);
        bytes.extend_from_slice(&frame(command::REGISTER_SESSION, vec![1, 0, 0, 0]));
        let framer = StreamFramer::new(ByteOrder::Little);
        let (frames, consumed) = framer.extract_frames(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(consumed, bytes.len());
    }
}
