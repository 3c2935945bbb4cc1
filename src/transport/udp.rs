//! UDP sockets as datagram transports, plus receive helpers that decode
//! one datagram into an [`IncomingPacket`].
//!
//! The tokio socket is driven with `try_send_to`: the fragmentation layer
//! never waits, so a socket that is not writable fails the send and the
//! message is discarded. Callers await `writable()` first when they need to.

use crate::config::MAX_DATAGRAM_SIZE;
use crate::core::packet::IncomingPacket;
use crate::error::Result;
use crate::transport::DatagramTransport;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tracing::trace;

impl DatagramTransport for std::net::UdpSocket {
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.send_to(datagram, destination)
    }
}

impl DatagramTransport for tokio::net::UdpSocket {
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.try_send_to(datagram, destination)
    }
}

fn receive_buffer() -> BytesMut {
    BytesMut::zeroed(MAX_DATAGRAM_SIZE)
}

fn decode_received(
    mut buf: BytesMut,
    len: usize,
    from: SocketAddr,
) -> Result<(IncomingPacket, SocketAddr)> {
    buf.truncate(len);
    trace!(len, %from, "Datagram received");
    Ok((IncomingPacket::decode(buf.freeze())?, from))
}

/// Block until one datagram arrives and decode it.
pub fn recv_packet(socket: &std::net::UdpSocket) -> Result<(IncomingPacket, SocketAddr)> {
    let mut buf = receive_buffer();
    let (len, from) = socket.recv_from(&mut buf)?;
    decode_received(buf, len, from)
}

/// Await one datagram and decode it.
pub async fn recv_packet_async(
    socket: &tokio::net::UdpSocket,
) -> Result<(IncomingPacket, SocketAddr)> {
    let mut buf = receive_buffer();
    let (len, from) = socket.recv_from(&mut buf).await?;
    decode_received(buf, len, from)
}
