//! # Error Types
//!
//! Error handling for the fragmentation and reassembly layer.
//!
//! This module defines every error variant that can surface while building,
//! sending, decoding or reading a fragmented message.
//!
//! ## Error Categories
//! - **Allocation**: buffer growth failed while assembling a message
//! - **Wire Format**: truncated datagrams, bad headers, inconsistent security metadata
//! - **Security**: MAC verification failures and missing keys
//! - **Transport**: datagram send failures (the message is discarded, never retried)
//! - **Usage**: reading an incomplete message, reading past the end, misconfiguration
//!
//! Duplicate packets are not errors; they are reported through
//! [`AddOutcome::Duplicate`](crate::protocol::incoming::AddOutcome).
//!
//! ## Example Usage
//! ```rust
//! use safe_datagram::core::packet::IncomingPacket;
//! use safe_datagram::error::{ProtocolError, Result};
//! use bytes::Bytes;
//!
//! fn payload_of(datagram: &'static [u8]) -> Result<usize> {
//!     let packet = IncomingPacket::decode(Bytes::from_static(datagram))?;
//!     Ok(packet.payload_len())
//! }
//!
//! match payload_of(b"MaGic6.0") {
//!     Err(ProtocolError::TruncatedPacket { .. }) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use crate::core::header::MessageId;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_SHORT_WRITE: &str = "Datagram was only partially sent";

    /// Security header errors
    pub const ERR_MAC_WITHOUT_KEY_ID: &str = "MAC flag set without a MAC key id";
    pub const ERR_ENC_WITHOUT_KEY_ID: &str = "Encryption flag set without an encryption key id";
    pub const ERR_EXTRAS_EXCEED_BODY: &str = "Security metadata exceeds the declared body length";
    pub const ERR_KEY_ID_NOT_UTF8: &str = "Key id is not valid UTF-8";
    pub const ERR_KEY_ID_TOO_LONG: &str = "Key id longer than 65535 bytes";
    pub const ERR_KEY_ID_WITHOUT_FLAG: &str = "Key id length given without its security flag";

    /// Security errors
    pub const ERR_MAC_MISSING: &str = "Packet carries no MAC but authentication is required";

    /// Configuration errors
    pub const ERR_MAC_KEY_EMPTY: &str = "MAC key must not be empty";
}

/// ProtocolError is the error type for all fragmentation and reassembly operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Allocation failed: {0}")]
    AllocationFailure(#[from] TryReserveError),

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Truncated packet: expected {expected} bytes, found {actual}")]
    TruncatedPacket { expected: usize, actual: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Malformed security header: {0}")]
    MalformedSecurityHeader(&'static str),

    #[error("Security configuration must be set before any payload is written")]
    SecurityConfigAfterPayload,

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("MAC verification failed for packet {seq}")]
    MacVerificationFailed { seq: u16 },

    #[error("Packet is authenticated but no MAC key is available")]
    MacKeyUnavailable,

    #[error("Message is corrupt after a failed MAC verification")]
    MessageCorrupt,

    #[error("Message is not complete")]
    MessageIncomplete,

    #[error("Requested {requested} bytes but only {available} remain")]
    InsufficientData { requested: usize, available: usize },

    #[error("Delimiter not found in received data")]
    DelimiterNotFound,

    #[error("Packet belongs to message {found}, expected {expected}")]
    MessageIdMismatch { expected: MessageId, found: MessageId },

    #[error("Sequence number {seq} conflicts with last sequence {last}")]
    SequenceOutOfRange { seq: u16, last: u16 },

    #[error("Message too large: {attempted} bytes exceeds limit of {limit}")]
    MessageTooLarge { attempted: usize, limit: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error is a security failure (the data must not be trusted).
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::SecurityError(_)
                | ProtocolError::MacVerificationFailed { .. }
                | ProtocolError::MacKeyUnavailable
                | ProtocolError::MessageCorrupt
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_classification() {
        assert!(ProtocolError::MacVerificationFailed { seq: 3 }.is_security_error());
        assert!(ProtocolError::MessageCorrupt.is_security_error());
        assert!(!ProtocolError::DelimiterNotFound.is_security_error());
        assert!(!ProtocolError::InvalidHeader.is_security_error());
    }

    #[test]
    fn test_display_messages() {
        let err = ProtocolError::TruncatedPacket {
            expected: 40,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "Truncated packet: expected 40 bytes, found 12"
        );

        let err = ProtocolError::SequenceOutOfRange { seq: 9, last: 4 };
        assert!(err.to_string().contains("9"));
    }
}
