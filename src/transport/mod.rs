//! # Transport Layer
//!
//! The datagram send primitive the fragmentation layer writes through.
//!
//! ## Implementations
//! - **UDP**: `std::net::UdpSocket` and non-blocking `tokio::net::UdpSocket`
//! - **Local**: in-memory loopback with failure injection for tests and benches
//!
//! Socket creation, binding and readiness multiplexing belong to the caller.

pub mod local;
pub mod udp;

pub use local::LoopbackTransport;

use std::io;
use std::net::SocketAddr;

/// Sends one datagram per call.
///
/// Returns the number of bytes written. A count short of `datagram.len()`
/// is treated as a failure by the sender.
pub trait DatagramTransport {
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize>;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for &mut T {
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        (**self).send_datagram(datagram, destination)
    }
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for Box<T> {
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        (**self).send_datagram(datagram, destination)
    }
}
