//! Client engine: the originator side of a CIP exchange. A thin struct
//! wrapping one socket plus minimal per-connection state, exposing typed
//! request/response methods over ENIP/TCP.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::byte::ByteOrder;
use crate::cip::{self, Request, Response};
use crate::enip::{self, command, Encapsulation};
use crate::error::{Error, Result};
use crate::profile::Profile;

/// An open session to one target, holding the TCP stream and the session
/// handle ENIP assigned on RegisterSession.
pub struct Connection {
    stream: TcpStream,
    session_id: u32,
    profile: Profile,
    sender_context: AtomicU32,
}

impl Connection {
    fn next_context(&self) -> [u8; 8] {
        let n = self.sender_context.fetch_add(1, Ordering::Relaxed);
        let mut ctx = [0u8; 8];
        ctx[0..4].copy_from_slice(&n.to_le_bytes());
        ctx
    }

    async fn send_and_receive(&mut self, encap: Encapsulation) -> Result<Encapsulation> {
        let order = self.profile.enip_byte_order;
        let bytes = enip::encode(order, &encap);
        self.stream
            .write_all(&bytes)
            .await
            .map_err(|e| Error::network(self.stream.peer_addr().map(|a| a.to_string()).unwrap_or_default(), e))?;

        let mut header = [0u8; enip::HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| Error::network(self.stream.peer_addr().map(|a| a.to_string()).unwrap_or_default(), e))?;
        let length = order.get_u16(&header[2..4])? as usize;
        let mut body = vec![0u8; length];
        if length > 0 {
            self.stream
                .read_exact(&mut body)
                .await
                .map_err(|e| Error::network(self.stream.peer_addr().map(|a| a.to_string()).unwrap_or_default(), e))?;
        }
        let mut full = header.to_vec();
        full.extend_from_slice(&body);
        enip::decode(order, &full)
    }

    /// RegisterSession then return a connected session ready for service
    /// invocation.
    pub async fn connect<A: ToSocketAddrs>(addr: A, profile: Profile) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::network("unknown", e))?;
        let mut conn = Self {
            stream,
            session_id: 0,
            profile,
            sender_context: AtomicU32::new(1),
        };
        let ctx = conn.next_context();
        let req = Encapsulation {
            command: command::REGISTER_SESSION,
            session_id: 0,
            status: 0,
            sender_context: ctx,
            options: 0,
            data: vec![1, 0, 0, 0],
        };
        let reply = conn.send_and_receive(req).await?;
        if reply.status != enip::status::SUCCESS {
            return Err(Error::Session(crate::error::SessionError::Unknown {
                id: reply.session_id,
            }));
        }
        conn.session_id = reply.session_id;
        Ok(conn)
    }

    /// Send one CIP service request over SendRRData and return the decoded
    /// response.
    pub async fn invoke_service(&mut self, req: &Request) -> Result<Response> {
        let order = self.profile.enip_byte_order;
        let cip_bytes = cip::encode_request(self.profile.include_cip_path_size, req);
        let address_item = enip::CpfItem {
            type_id: enip::cpf_type::NULL_ADDRESS,
            data: Vec::new(),
        };
        let body = enip::encode_rr_or_unit_body(
            order,
            self.profile.use_cpf,
            0,
            address_item,
            enip::cpf_type::UNCONNECTED_DATA,
            &cip_bytes,
        );
        let ctx = self.next_context();
        let encap = Encapsulation {
            command: command::SEND_RR_DATA,
            session_id: self.session_id,
            status: 0,
            sender_context: ctx,
            options: 0,
            data: body,
        };
        let reply = self.send_and_receive(encap).await?;
        if reply.status != enip::status::SUCCESS {
            return Err(Error::CipStatus {
                status: reply.status as u8,
                detail: "encapsulation-level error on SendRRData".into(),
            });
        }
        let parsed = enip::decode_rr_or_unit_body(order, self.profile.use_cpf, !self.profile.cpf_policy.strict, &reply.data)?;
        cip::decode_response(self.profile.include_cip_resp_reserved, &parsed.cip_payload)
    }

    /// Opens a Class 3/1 connection via the Connection Manager and returns
    /// the (O->T, T->O) connection IDs from the success response.
    pub async fn forward_open(&mut self, path: crate::epath::LogicalPath, payload: Vec<u8>) -> Result<(u32, u32)> {
        let req = Request::new(cip::service::FORWARD_OPEN, path, payload);
        let resp = self.invoke_service(&req).await?;
        if resp.status != cip::status::SUCCESS || resp.payload.len() < 8 {
            return Err(Error::CipStatus {
                status: resp.status,
                detail: "Forward_Open failed".into(),
            });
        }
        let o_to_t = ByteOrder::Little.get_u32(&resp.payload[0..4])?;
        let t_to_o = ByteOrder::Little.get_u32(&resp.payload[4..8])?;
        Ok((o_to_t, t_to_o))
    }

    pub async fn forward_close(&mut self, path: crate::epath::LogicalPath, payload: Vec<u8>) -> Result<()> {
        let req = Request::new(cip::service::FORWARD_CLOSE, path, payload);
        let resp = self.invoke_service(&req).await?;
        if resp.status != cip::status::SUCCESS {
            return Err(Error::CipStatus {
                status: resp.status,
                detail: "Forward_Close failed".into(),
            });
        }
        Ok(())
    }

    /// Sends one SendUnitData frame carrying connected I/O data; fire and
    /// forget, matching the implicit-messaging contract (no per-datagram
    /// CIP response is expected).
    pub async fn send_io_data(&mut self, connection_id: u32, data: &[u8]) -> Result<()> {
        let order = self.profile.enip_byte_order;
        let address_item = enip::CpfItem {
            type_id: enip::cpf_type::CONNECTED_ADDRESS,
            data: order.append_u32(&[], connection_id),
        };
        let body = enip::encode_rr_or_unit_body(
            order,
            self.profile.use_cpf,
            0,
            address_item,
            enip::cpf_type::CONNECTED_DATA,
            data,
        );
        let ctx = self.next_context();
        let encap = Encapsulation {
            command: command::SEND_UNIT_DATA,
            session_id: self.session_id,
            status: 0,
            sender_context: ctx,
            options: 0,
            data: body,
        };
        self.send_and_receive(encap).await?;
        Ok(())
    }

    pub async fn receive_io_data(&mut self) -> Result<Vec<u8>> {
        let order = self.profile.enip_byte_order;
        let mut header = [0u8; enip::HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| Error::network("peer", e))?;
        let length = order.get_u16(&header[2..4])? as usize;
        let mut body = vec![0u8; length];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| Error::network("peer", e))?;
        let mut full = header.to_vec();
        full.extend_from_slice(&body);
        let encap = enip::decode(order, &full)?;
        let parsed = enip::decode_rr_or_unit_body(order, self.profile.use_cpf, !self.profile.cpf_policy.strict, &encap.data)?;
        Ok(parsed.cip_payload)
    }

    /// UnregisterSession; ENIP sends no reply to this command, so this does
    /// not wait for one.
    pub async fn disconnect(mut self) -> Result<()> {
        let ctx = self.next_context();
        let encap = Encapsulation {
            command: command::UNREGISTER_SESSION,
            session_id: self.session_id,
            status: 0,
            sender_context: ctx,
            options: 0,
            data: Vec::new(),
        };
        let order = self.profile.enip_byte_order;
        let bytes = enip::encode(order, &encap);
        self.stream
            .write_all(&bytes)
            .await
            .map_err(|e| Error::network("peer", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epath::LogicalPath;

    #[tokio::test]
    async fn connect_registers_session_and_invokes_get_attribute_single() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let order = ByteOrder::Little;

            let mut header = [0u8; enip::HEADER_LEN];
            stream.read_exact(&mut header).await.unwrap();
            let len = order.get_u16(&header[2..4]).unwrap() as usize;
            let mut data = vec![0u8; len];
            stream.read_exact(&mut data).await.unwrap();
            let req = enip::decode(order, &[&header[..], &data[..]].concat()).unwrap();
            assert_eq!(req.command, command::REGISTER_SESSION);
            let reply = Encapsulation {
                command: req.command,
                session_id: 7,
                status: enip::status::SUCCESS,
                sender_context: req.sender_context,
                options: 0,
                data: vec![1, 0, 0, 0],
            };
            stream.write_all(&enip::encode(order, &reply)).await.unwrap();

            let mut header = [0u8; enip::HEADER_LEN];
            stream.read_exact(&mut header).await.unwrap();
            let len = order.get_u16(&header[2..4]).unwrap() as usize;
            let mut data = vec![0u8; len];
            stream.read_exact(&mut data).await.unwrap();
            let req = enip::decode(order, &[&header[..], &data[..]].concat()).unwrap();
            assert_eq!(req.command, command::SEND_RR_DATA);

            let cip_resp = cip::Response::ok(cip::service::GET_ATTRIBUTE_SINGLE, vec![0x34, 0x12]);
            let resp_bytes = cip::encode_response(true, &cip_resp);
            let address_item = enip::CpfItem {
                type_id: enip::cpf_type::NULL_ADDRESS,
                data: Vec::new(),
            };
            let body = enip::encode_rr_or_unit_body(order, true, 0, address_item, enip::cpf_type::UNCONNECTED_DATA, &resp_bytes);
            let reply = Encapsulation {
                command: req.command,
                session_id: req.session_id,
                status: enip::status::SUCCESS,
                sender_context: req.sender_context,
                options: 0,
                data: body,
            };
            stream.write_all(&enip::encode(order, &reply)).await.unwrap();
        });

        let mut conn = Connection::connect(addr, Profile::strict_odva()).await.unwrap();
        assert_eq!(conn.session_id, 7);

        let req = Request::new(
            cip::service::GET_ATTRIBUTE_SINGLE,
            LogicalPath::class_instance_attribute(0x01, 1, 1),
            Vec::new(),
        );
        let resp = conn.invoke_service(&req).await.unwrap();
        assert_eq!(resp.payload, vec![0x34, 0x12]);

        server.await.unwrap();
    }
}
