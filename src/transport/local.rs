//! In-memory datagram transport.
//!
//! Keeps every sent datagram in a queue so tests and benches can feed them
//! to a reassembler. Send failures and short writes can be injected.

use crate::transport::DatagramTransport;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queue: VecDeque<(SocketAddr, Bytes)>,
    attempts: usize,
    fail_after: Option<usize>,
    short_write_after: Option<usize>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send once `sends` datagrams have gone through.
    pub fn fail_after(mut self, sends: usize) -> Self {
        self.fail_after = Some(sends);
        self
    }

    /// Report one byte short for every send once `sends` datagrams have gone
    /// through. Short datagrams are not queued.
    pub fn short_write_after(mut self, sends: usize) -> Self {
        self.short_write_after = Some(sends);
        self
    }

    /// Clear failure injection.
    pub fn heal(&mut self) {
        self.fail_after = None;
        self.short_write_after = None;
    }

    /// Send attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Datagrams waiting in the queue.
    pub fn sent_count(&self) -> usize {
        self.queue.len()
    }

    pub fn pop(&mut self) -> Option<(SocketAddr, Bytes)> {
        self.queue.pop_front()
    }

    /// Drain the queue, dropping destinations.
    pub fn take_datagrams(&mut self) -> Vec<Bytes> {
        self.queue.drain(..).map(|(_, datagram)| datagram).collect()
    }
}

impl DatagramTransport for LoopbackTransport {
    #[instrument(skip(self, datagram), fields(len = datagram.len()), level = "trace")]
    fn send_datagram(&mut self, datagram: &[u8], destination: SocketAddr) -> io::Result<usize> {
        let attempt = self.attempts;
        self.attempts += 1;

        if self.fail_after.is_some_and(|n| attempt >= n) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "injected send failure",
            ));
        }
        if self.short_write_after.is_some_and(|n| attempt >= n) {
            return Ok(datagram.len().saturating_sub(1));
        }

        self.queue
            .push_back((destination, Bytes::copy_from_slice(datagram)));
        debug!(queued = self.queue.len(), "Datagram queued");
        Ok(datagram.len())
    }
}
