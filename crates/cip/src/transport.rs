//! TCP/UDP transport bindings: accept loop, stream framing, and the UDP
//! unicast/multicast listeners ENIP discovery traffic uses.

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::byte::ByteOrder;
use crate::dispatch::{DispatchEngine, StreamFramer};
use crate::enip::{self, Encapsulation};
use crate::fault::FaultEngine;
use crate::profile;

const READ_CHUNK: usize = 4096;
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Computes the ENIP/CIP I/O multicast group for a device address, per the
/// `239.192.1.((last_octet - 1) mod 32)` allocation scheme.
pub fn multicast_group(device_ip: Ipv4Addr) -> Ipv4Addr {
    let last = device_ip.octets()[3];
    let offset = last.wrapping_sub(1) % 32;
    Ipv4Addr::new(239, 192, 1, offset)
}

/// Accepts TCP connections and spawns one handler task per connection. Runs
/// until `listener` errors out (the caller decides whether to restart).
pub async fn run_tcp_server(
    listener: TcpListener,
    engine: Arc<DispatchEngine>,
    fault: Arc<FaultEngine>,
) -> io::Result<()> {
    loop {
        let accepted = timeout(ACCEPT_POLL_TIMEOUT, listener.accept()).await;
        let (stream, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(e),
            Err(_) => continue, // no connection within the poll window, loop again
        };
        let engine = engine.clone();
        let fault = fault.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, peer.ip().to_string(), engine, fault).await {
                debug!(%peer, error = %e, "tcp connection ended");
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    remote_ip: String,
    engine: Arc<DispatchEngine>,
    fault: Arc<FaultEngine>,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let order = profile::current().enip_byte_order;
        let read = match timeout(IDLE_READ_TIMEOUT, tokio::io::AsyncReadExt::read(&mut stream, &mut chunk)).await {
            Ok(Ok(0)) => return Ok(()), // peer closed
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(%remote_ip, "idle read timeout, closing connection");
                return Ok(());
            }
        };
        buf.extend_from_slice(&chunk[..read]);

        let framer = StreamFramer::new(order);
        let (frames, consumed) = framer.extract_frames(&buf);
        buf.drain(..consumed);

        for frame in frames {
            let reply = match engine.handle(&remote_ip, frame).await {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%remote_ip, error = %e, "dispatch error");
                    continue;
                }
            };
            let bytes = enip::encode(order, &reply);
            let action = fault.next_action();
            let should_close = fault.apply(&mut stream, &action, &bytes).await;
            if should_close {
                return Ok(());
            }
        }
    }
}

/// Single-datagram UDP listener for ListIdentity/SendUnitData traffic on the
/// ENIP I/O port (2222 by convention). Each datagram is exactly one frame;
/// there is no stream resync to do.
pub async fn run_udp_unicast(socket: UdpSocket, engine: Arc<DispatchEngine>) -> io::Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let order = profile::current().enip_byte_order;
        let frame = match enip::decode(order, &buf[..n]) {
            Ok(f) => f,
            Err(e) => {
                debug!(%peer, error = %e, "dropping malformed udp datagram");
                continue;
            }
        };
        match engine.handle(&peer.ip().to_string(), frame).await {
            Ok(Some(reply)) => {
                let bytes = enip::encode(order, &reply);
                socket.send_to(&bytes, peer).await?;
            }
            Ok(None) => {}
            Err(e) => debug!(%peer, error = %e, "dispatch error on udp datagram"),
        }
    }
}

/// Joins the I/O multicast group derived from `device_ip`, with loopback
/// enabled so a single-host test setup can see its own traffic.
pub fn join_io_multicast(socket: &UdpSocket, device_ip: Ipv4Addr, ttl: u32) -> io::Result<()> {
    let group = multicast_group(device_ip);
    socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(())
}

/// Builds the reply frame for one decoded request, exposed standalone so
/// the client engine and tests can exercise the encode side without a live
/// socket.
pub fn encode_reply(order: ByteOrder, reply: &Encapsulation) -> Vec<u8> {
    enip::encode(order, reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_group_wraps_at_32() {
        assert_eq!(multicast_group(Ipv4Addr::new(192, 168, 1, 1)), Ipv4Addr::new(239, 192, 1, 0));
        assert_eq!(multicast_group(Ipv4Addr::new(192, 168, 1, 33)), Ipv4Addr::new(239, 192, 1, 0));
        assert_eq!(multicast_group(Ipv4Addr::new(192, 168, 1, 5)), Ipv4Addr::new(239, 192, 1, 4));
    }

    #[test]
    fn multicast_group_handles_octet_zero() {
        assert_eq!(multicast_group(Ipv4Addr::new(10, 0, 0, 0)), Ipv4Addr::new(239, 192, 1, 31));
    }
}
