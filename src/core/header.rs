//! Fixed datagram header and message identity.
//!
//! ```text
//! [Magic(8)] [Last(1)] [Seq(2)] [BodyLen(2)] [SrcIp(4)] [SrcPid(2)]
//! [SrcTime(4)] [Counter(2)] [SecFlags(2)] [MacIdLen(2)] [EncIdLen(2)]
//! ```
//!
//! All integers are big-endian. `BodyLen` counts everything after the fixed
//! header: key ids, the MAC block and the payload.

use crate::config::{HEADER_SIZE, MAGIC_BYTES};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of one message from one sending process.
///
/// Not unique across process restarts beyond pid and send time; it only
/// routes packets to the right reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId {
    pub source_ip: u32,
    pub source_pid: u16,
    pub send_timestamp: u32,
    pub counter: u16,
}

impl MessageId {
    pub const WIRE_SIZE: usize = 12;

    pub fn new(source_ip: u32, source_pid: u16, send_timestamp: u32, counter: u16) -> Self {
        Self {
            source_ip,
            source_pid,
            send_timestamp,
            counter,
        }
    }

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.source_ip);
        buf.put_u16(self.source_pid);
        buf.put_u32(self.send_timestamp);
        buf.put_u16(self.counter);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            source_ip: buf.get_u32(),
            source_pid: buf.get_u16(),
            send_timestamp: buf.get_u32(),
            counter: buf.get_u16(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Ipv4Addr::from(self.source_ip),
            self.source_pid,
            self.send_timestamp,
            self.counter
        )
    }
}

/// Hands out message ids for one sending process.
#[derive(Debug, Clone)]
pub struct MessageIdGenerator {
    source_ip: u32,
    source_pid: u16,
    next_counter: u16,
}

impl MessageIdGenerator {
    /// Generator for the current process.
    pub fn new(source_ip: Ipv4Addr) -> Self {
        Self::with_pid(source_ip, std::process::id() as u16)
    }

    pub fn with_pid(source_ip: Ipv4Addr, source_pid: u16) -> Self {
        Self {
            source_ip: u32::from(source_ip),
            source_pid,
            next_counter: 0,
        }
    }

    /// Next id, stamped with the current UNIX time in seconds.
    /// The counter wraps at `u16::MAX`.
    pub fn next_id(&mut self) -> MessageId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let counter = self.next_counter;
        self.next_counter = self.next_counter.wrapping_add(1);
        MessageId::new(self.source_ip, self.source_pid, now, counter)
    }
}

/// Bitmask announcing which security extras follow the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityFlags(u16);

impl SecurityFlags {
    pub const MAC: SecurityFlags = SecurityFlags(0x0001);
    pub const ENCRYPTION: SecurityFlags = SecurityFlags(0x0002);

    pub const fn empty() -> Self {
        SecurityFlags(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        SecurityFlags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: SecurityFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SecurityFlags) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Decoded fixed header of a long-format datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub is_last: bool,
    pub seq: u16,
    pub body_len: u16,
    pub message_id: MessageId,
    pub flags: SecurityFlags,
    pub mac_key_id_len: u16,
    pub enc_key_id_len: u16,
}

impl PacketHeader {
    /// Whether `datagram` opens with the long-format magic marker.
    pub fn has_magic(datagram: &[u8]) -> bool {
        datagram.len() >= MAGIC_BYTES.len() && datagram[..MAGIC_BYTES.len()] == MAGIC_BYTES
    }

    /// Write the fixed header into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u8(u8::from(self.is_last));
        buf.put_u16(self.seq);
        buf.put_u16(self.body_len);
        self.message_id.put(buf);
        buf.put_u16(self.flags.bits());
        buf.put_u16(self.mac_key_id_len);
        buf.put_u16(self.enc_key_id_len);
    }

    /// Parse the fixed header at the start of `datagram`.
    ///
    /// Only the header itself is checked here; body length consistency is
    /// validated by the packet decoder.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < HEADER_SIZE {
            return Err(ProtocolError::TruncatedPacket {
                expected: HEADER_SIZE,
                actual: datagram.len(),
            });
        }
        if !Self::has_magic(datagram) {
            return Err(ProtocolError::InvalidHeader);
        }

        let mut buf = &datagram[MAGIC_BYTES.len()..HEADER_SIZE];
        let is_last = match buf.get_u8() {
            0 => false,
            1 => true,
            _ => return Err(ProtocolError::InvalidHeader),
        };
        let seq = buf.get_u16();
        let body_len = buf.get_u16();
        let message_id = MessageId::get(&mut buf);
        let flags = SecurityFlags::from_bits(buf.get_u16());
        let mac_key_id_len = buf.get_u16();
        let enc_key_id_len = buf.get_u16();

        Ok(Self {
            is_last,
            seq,
            body_len,
            message_id,
            flags,
            mac_key_id_len,
            enc_key_id_len,
        })
    }
}
