//! Observability and Metrics
//!
//! Per-instance counters for the sending and receiving halves of the
//! fragmentation layer. Each assembler and reassembler owns its own set;
//! there is no process-wide registry.
//!
//! Uses atomic counters so a snapshot can be taken through a shared reference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counters for one outgoing message assembler
#[derive(Debug)]
pub struct SenderMetrics {
    /// Messages handed to the transport in full
    pub messages_sent: AtomicU64,
    /// Datagrams handed to the transport
    pub packets_sent: AtomicU64,
    /// Payload bytes of fully sent messages
    pub payload_bytes_sent: AtomicU64,
    /// Wire bytes sent, headers included
    pub wire_bytes_sent: AtomicU64,
    /// Messages discarded after a transport failure
    pub send_failures: AtomicU64,
    start_time: Instant,
}

impl SenderMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            payload_bytes_sent: AtomicU64::new(0),
            wire_bytes_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one datagram on the wire
    pub fn packet_sent(&self, wire_bytes: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.wire_bytes_sent.fetch_add(wire_bytes, Ordering::Relaxed);
    }

    /// Record a message whose packets all went out
    pub fn message_sent(&self, payload_bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes_sent
            .fetch_add(payload_bytes, Ordering::Relaxed);
    }

    /// Record a message dropped on a transport failure
    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean payload size over every fully sent message, in bytes
    pub fn average_message_size(&self) -> u64 {
        let messages = self.messages_sent.load(Ordering::Relaxed);
        if messages == 0 {
            return 0;
        }
        self.payload_bytes_sent.load(Ordering::Relaxed) / messages
    }

    pub fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            payload_bytes_sent: self.payload_bytes_sent.load(Ordering::Relaxed),
            wire_bytes_sent: self.wire_bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            average_message_size: self.average_message_size(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            messages_sent = snapshot.messages_sent,
            packets_sent = snapshot.packets_sent,
            payload_bytes_sent = snapshot.payload_bytes_sent,
            wire_bytes_sent = snapshot.wire_bytes_sent,
            send_failures = snapshot.send_failures,
            average_message_size = snapshot.average_message_size,
            uptime_seconds = snapshot.uptime_seconds,
            "Sender metrics snapshot"
        );
    }
}

impl Default for SenderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of sender metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub messages_sent: u64,
    pub packets_sent: u64,
    pub payload_bytes_sent: u64,
    pub wire_bytes_sent: u64,
    pub send_failures: u64,
    pub average_message_size: u64,
    pub uptime_seconds: u64,
}

/// Counters for one incoming message reassembler
#[derive(Debug)]
pub struct ReceiverMetrics {
    /// Packets stored in a slot
    pub packets_accepted: AtomicU64,
    /// Packets dropped as duplicates
    pub duplicates: AtomicU64,
    /// Packets rejected for inconsistent sequencing
    pub rejected: AtomicU64,
    /// Slots whose MAC verified
    pub macs_verified: AtomicU64,
    /// Slots whose MAC failed
    pub mac_failures: AtomicU64,
    /// Payload bytes handed to the reader
    pub bytes_read: AtomicU64,
    start_time: Instant,
}

impl ReceiverMetrics {
    pub fn new() -> Self {
        Self {
            packets_accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            macs_verified: AtomicU64::new(0),
            mac_failures: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn packet_accepted(&self) {
        self.packets_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mac_verified(&self) {
        self.macs_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mac_failed(&self) {
        self.mac_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            packets_accepted: self.packets_accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            macs_verified: self.macs_verified.load(Ordering::Relaxed),
            mac_failures: self.mac_failures.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_accepted = snapshot.packets_accepted,
            duplicates = snapshot.duplicates,
            rejected = snapshot.rejected,
            macs_verified = snapshot.macs_verified,
            mac_failures = snapshot.mac_failures,
            bytes_read = snapshot.bytes_read,
            uptime_seconds = snapshot.uptime_seconds,
            "Receiver metrics snapshot"
        );
    }
}

impl Default for ReceiverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of receiver metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub packets_accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub macs_verified: u64,
    pub mac_failures: u64,
    pub bytes_read: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
