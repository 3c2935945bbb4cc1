//! One datagram: payload accumulation, security metadata and wire encoding.
//!
//! Two wire formats exist side by side:
//!
//! ```text
//! Long:  [Header(31)] [MacKeyId] [Mac(16)] [EncKeyId] [Payload]
//! Short: [Payload]
//!        [Tag "CRAP"(4)] [Flags(2)] [MacIdLen(2)] [EncIdLen(2)] [MacKeyId] [Mac(16)] [EncKeyId] [Payload]
//! ```
//!
//! A datagram that does not open with the magic marker is a short
//! (single-packet) message. Short messages are what peers send when the
//! whole message fits in one packet and older peers only understand them.
//!
//! The MAC covers every byte except the MAC block itself: the fixed header
//! (or short security prefix), the key ids, then the payload.

use crate::config::{
    HEADER_SIZE, MAC_SIZE, SECURITY_TAG, SHORT_SECURITY_HEADER_SIZE, USABLE_PACKET_SIZE,
};
use crate::core::header::{MessageId, PacketHeader, SecurityFlags};
use crate::core::mac::{MacConfig, MacProvider};
use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outgoing packet under construction.
///
/// Security metadata must be configured while the packet is still empty;
/// the space it needs is taken out of the payload capacity.
#[derive(Debug, Clone)]
pub struct Packet {
    capacity: usize,
    mac: Option<MacConfig>,
    encryption_key_id: Option<String>,
    payload: Vec<u8>,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            capacity: USABLE_PACKET_SIZE,
            mac: None,
            encryption_key_id: None,
            payload: Vec::new(),
        }
    }
}

impl Packet {
    /// Packet with the default usable size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Packet whose body (security extras plus payload) holds at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity > u16::MAX as usize {
            return Err(ProtocolError::OversizedPacket(capacity));
        }
        let mut payload = Vec::new();
        payload.try_reserve_exact(capacity)?;
        Ok(Self {
            capacity,
            mac: None,
            encryption_key_id: None,
            payload,
        })
    }

    /// Body capacity, security reservation included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes reserved ahead of the payload for key ids and the MAC block.
    pub fn reserved(&self) -> usize {
        reserved_for(self.mac.as_ref(), self.encryption_key_id.as_deref())
    }

    /// Payload bytes this packet can hold with its current security settings.
    pub fn payload_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.reserved())
    }

    pub fn remaining(&self) -> usize {
        self.payload_capacity().saturating_sub(self.payload.len())
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn mac_key_id(&self) -> Option<&str> {
        self.mac.as_ref().map(MacConfig::key_id)
    }

    pub fn encryption_key_id(&self) -> Option<&str> {
        self.encryption_key_id.as_deref()
    }

    /// Authenticate this packet with `provider` under `key_id`.
    ///
    /// Fails once any payload byte has been written.
    pub fn enable_authentication(
        &mut self,
        provider: Arc<dyn MacProvider>,
        key_id: &str,
    ) -> Result<()> {
        let encryption_key_id = self.encryption_key_id.clone();
        self.set_security(Some(MacConfig::new(provider, key_id)), encryption_key_id)
    }

    /// Announce the encryption key id the payload was sealed with.
    ///
    /// Fails once any payload byte has been written.
    pub fn enable_encryption_id(&mut self, key_id: &str) -> Result<()> {
        let mac = self.mac.clone();
        self.set_security(mac, Some(key_id.to_string()))
    }

    /// Replace the whole security configuration.
    pub(crate) fn set_security(
        &mut self,
        mac: Option<MacConfig>,
        encryption_key_id: Option<String>,
    ) -> Result<()> {
        if !self.payload.is_empty() {
            return Err(ProtocolError::SecurityConfigAfterPayload);
        }
        let too_long = |id: &str| id.len() > u16::MAX as usize;
        if mac.as_ref().is_some_and(|m| too_long(m.key_id()))
            || encryption_key_id.as_deref().is_some_and(too_long)
        {
            return Err(ProtocolError::SecurityError(
                constants::ERR_KEY_ID_TOO_LONG.to_string(),
            ));
        }
        let reserved = reserved_for(mac.as_ref(), encryption_key_id.as_deref());
        if reserved >= self.capacity {
            return Err(ProtocolError::OversizedPacket(reserved));
        }

        self.mac = mac;
        self.encryption_key_id = encryption_key_id;
        Ok(())
    }

    /// Copy as much of `data` as fits, returning the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.payload.extend_from_slice(&data[..take]);
        take
    }

    /// Header describing this packet at position `seq` of message `message_id`.
    pub fn write_header(&self, is_last: bool, seq: u16, message_id: MessageId) -> PacketHeader {
        PacketHeader {
            is_last,
            seq,
            body_len: (self.reserved() + self.payload.len()) as u16,
            message_id,
            flags: self.flags(),
            mac_key_id_len: self.mac_key_id().map_or(0, str::len) as u16,
            enc_key_id_len: self.encryption_key_id().map_or(0, str::len) as u16,
        }
    }

    /// Encode as a long-format datagram.
    pub fn encode(&self, is_last: bool, seq: u16, message_id: MessageId) -> Bytes {
        let header = self.write_header(is_last, seq, message_id);
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + header.body_len as usize);
        header.encode(&mut buf);
        self.put_body(&mut buf, 0);
        buf.freeze()
    }

    /// Encode as a short (single-packet) datagram.
    pub fn encode_short(&self) -> Bytes {
        let flags = self.flags();
        if flags.is_empty() {
            return Bytes::copy_from_slice(&self.payload);
        }

        let mut buf =
            BytesMut::with_capacity(SHORT_SECURITY_HEADER_SIZE + self.reserved() + self.len());
        buf.put_slice(&SECURITY_TAG);
        buf.put_u16(flags.bits());
        buf.put_u16(self.mac_key_id().map_or(0, str::len) as u16);
        buf.put_u16(self.encryption_key_id().map_or(0, str::len) as u16);
        self.put_body(&mut buf, 0);
        buf.freeze()
    }

    /// Whether the short encoding of this packet would be read back as
    /// something else: an unsecured payload that happens to open with the
    /// magic marker or the security tag.
    pub fn is_ambiguous_as_short(&self) -> bool {
        self.flags().is_empty()
            && (PacketHeader::has_magic(&self.payload) || self.payload.starts_with(&SECURITY_TAG))
    }

    fn flags(&self) -> SecurityFlags {
        let mut flags = SecurityFlags::empty();
        if self.mac.is_some() {
            flags.insert(SecurityFlags::MAC);
        }
        if self.encryption_key_id.is_some() {
            flags.insert(SecurityFlags::ENCRYPTION);
        }
        flags
    }

    /// Append key ids, MAC and payload after the prefix already in `buf`.
    fn put_body(&self, buf: &mut BytesMut, prefix_start: usize) {
        let mut mac_at = None;
        if let Some(mac) = &self.mac {
            buf.put_slice(mac.key_id.as_bytes());
            mac_at = Some(buf.len());
            buf.put_bytes(0, MAC_SIZE);
        }
        if let Some(id) = &self.encryption_key_id {
            buf.put_slice(id.as_bytes());
        }
        buf.put_slice(&self.payload);

        if let (Some(mac), Some(at)) = (&self.mac, mac_at) {
            self.add_mac(buf, mac, prefix_start, at);
        }
    }

    fn add_mac(&self, buf: &mut BytesMut, mac: &MacConfig, prefix_start: usize, at: usize) {
        let enc_id = self.encryption_key_id().map_or(&[][..], str::as_bytes);
        let tag = mac
            .provider
            .compute(&[&buf[prefix_start..at], enc_id, self.payload.as_slice()]);
        buf[at..at + MAC_SIZE].copy_from_slice(&tag);
    }
}

pub(crate) fn reserved_for(mac: Option<&MacConfig>, encryption_key_id: Option<&str>) -> usize {
    mac.map_or(0, |m| m.key_id.len() + MAC_SIZE) + encryption_key_id.map_or(0, str::len)
}

/// Which of the two datagram layouts a packet arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Long,
    Short,
}

/// A MAC tag together with the metadata it authenticates besides the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacBlock {
    tag: [u8; MAC_SIZE],
    header_extra: Bytes,
}

impl MacBlock {
    pub fn new(tag: [u8; MAC_SIZE], header_extra: Bytes) -> Self {
        Self { tag, header_extra }
    }

    pub fn tag(&self) -> &[u8; MAC_SIZE] {
        &self.tag
    }

    /// Header, short prefix and key-id bytes covered by the tag.
    pub fn header_extra(&self) -> &[u8] {
        &self.header_extra
    }

    pub fn verify(&self, provider: &dyn MacProvider, payload: &[u8]) -> bool {
        provider.verify(&[&self.header_extra[..], payload], &self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacState {
    Absent,
    Pending,
    Verified,
}

/// A decoded datagram.
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    format: WireFormat,
    header: Option<PacketHeader>,
    mac_key_id: Option<String>,
    encryption_key_id: Option<String>,
    mac: Option<MacBlock>,
    mac_state: MacState,
    payload: Bytes,
    cursor: usize,
}

/// Security extras split out of a datagram body.
struct SecurityExtras {
    mac_key_id: Option<String>,
    encryption_key_id: Option<String>,
    mac: Option<MacBlock>,
    payload_start: usize,
}

impl IncomingPacket {
    /// Decode one datagram. The payload is a zero-copy slice of `datagram`.
    #[instrument(skip(datagram), fields(len = datagram.len()), level = "trace")]
    pub fn decode(datagram: Bytes) -> Result<Self> {
        if PacketHeader::has_magic(&datagram) {
            Self::decode_long(datagram)
        } else {
            Self::decode_short(datagram)
        }
    }

    fn decode_long(datagram: Bytes) -> Result<Self> {
        let header = PacketHeader::decode(&datagram)?;
        let expected = HEADER_SIZE + header.body_len as usize;
        if datagram.len() != expected {
            return Err(ProtocolError::TruncatedPacket {
                expected,
                actual: datagram.len(),
            });
        }
        debug!(
            last = header.is_last,
            seq = header.seq,
            len = header.body_len,
            message_id = %header.message_id,
            "Fragmentation header"
        );

        let extras = read_security(
            &datagram,
            HEADER_SIZE,
            header.flags,
            header.mac_key_id_len as usize,
            header.enc_key_id_len as usize,
        )?;
        Ok(Self::assemble(WireFormat::Long, Some(header), &datagram, extras))
    }

    fn decode_short(datagram: Bytes) -> Result<Self> {
        if datagram.len() < SHORT_SECURITY_HEADER_SIZE || !datagram.starts_with(&SECURITY_TAG) {
            return Ok(Self {
                format: WireFormat::Short,
                header: None,
                mac_key_id: None,
                encryption_key_id: None,
                mac: None,
                mac_state: MacState::Absent,
                payload: datagram,
                cursor: 0,
            });
        }

        let field = |at: usize| u16::from_be_bytes([datagram[at], datagram[at + 1]]);
        let flags = SecurityFlags::from_bits(field(4));
        let mac_len = field(6) as usize;
        let enc_len = field(8) as usize;
        debug!(
            flags = flags.bits(),
            mac_key_id_len = mac_len,
            enc_key_id_len = enc_len,
            "Short message security header"
        );

        let extras = read_security(
            &datagram,
            SHORT_SECURITY_HEADER_SIZE,
            flags,
            mac_len,
            enc_len,
        )?;
        Ok(Self::assemble(WireFormat::Short, None, &datagram, extras))
    }

    fn assemble(
        format: WireFormat,
        header: Option<PacketHeader>,
        datagram: &Bytes,
        extras: SecurityExtras,
    ) -> Self {
        let mac_state = if extras.mac.is_some() {
            MacState::Pending
        } else {
            MacState::Absent
        };
        Self {
            format,
            header,
            mac_key_id: extras.mac_key_id,
            encryption_key_id: extras.encryption_key_id,
            mac: extras.mac,
            mac_state,
            payload: datagram.slice(extras.payload_start..),
            cursor: 0,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn is_short(&self) -> bool {
        self.format == WireFormat::Short
    }

    /// Fixed header; `None` for short messages.
    pub fn header(&self) -> Option<&PacketHeader> {
        self.header.as_ref()
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.header.map(|h| h.message_id)
    }

    /// Sequence number; a short message is always packet 0.
    pub fn seq(&self) -> u16 {
        self.header.map_or(0, |h| h.seq)
    }

    /// A short message is always its own last packet.
    pub fn is_last(&self) -> bool {
        self.header.map_or(true, |h| h.is_last)
    }

    pub fn mac_key_id(&self) -> Option<&str> {
        self.mac_key_id.as_deref()
    }

    pub fn encryption_key_id(&self) -> Option<&str> {
        self.encryption_key_id.as_deref()
    }

    pub fn has_mac(&self) -> bool {
        self.mac.is_some()
    }

    pub fn is_verified(&self) -> bool {
        self.mac_state == MacState::Verified
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check this packet's MAC.
    ///
    /// With a provider, a packet must carry a valid MAC. Without one, only
    /// unauthenticated packets pass.
    pub fn verify_mac(&mut self, provider: Option<&dyn MacProvider>) -> Result<()> {
        match (self.mac_state, provider, &self.mac) {
            (MacState::Verified, _, _) => Ok(()),
            (MacState::Absent, None, _) => Ok(()),
            (MacState::Absent, Some(_), _) => {
                warn!(seq = self.seq(), "Authentication required but packet has no MAC");
                Err(ProtocolError::SecurityError(
                    constants::ERR_MAC_MISSING.to_string(),
                ))
            }
            (MacState::Pending, None, _) => Err(ProtocolError::MacKeyUnavailable),
            (MacState::Pending, Some(provider), Some(mac)) => {
                if mac.verify(provider, &self.payload) {
                    debug!(seq = self.seq(), "MAC verified");
                    self.mac_state = MacState::Verified;
                    Ok(())
                } else {
                    warn!(seq = self.seq(), "MAC verification failed");
                    Err(ProtocolError::MacVerificationFailed { seq: self.seq() })
                }
            }
            (MacState::Pending, Some(_), None) => Err(ProtocolError::MacKeyUnavailable),
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        if self.mac_state == MacState::Pending {
            return Err(ProtocolError::MacKeyUnavailable);
        }
        Ok(())
    }

    /// Consume the next `size` payload bytes.
    ///
    /// Authenticated packets must pass [`verify_mac`](Self::verify_mac) first.
    pub fn read(&mut self, size: usize) -> Result<Bytes> {
        self.ensure_readable()?;
        let available = self.payload.len() - self.cursor;
        if size > available {
            return Err(ProtocolError::InsufficientData {
                requested: size,
                available,
            });
        }
        let out = self.payload.slice(self.cursor..self.cursor + size);
        self.cursor += size;
        Ok(out)
    }

    /// Consume up to and including the next `delim` byte.
    pub fn read_until(&mut self, delim: u8) -> Result<Bytes> {
        self.ensure_readable()?;
        let rest = &self.payload[self.cursor..];
        let at = rest
            .iter()
            .position(|&b| b == delim)
            .ok_or(ProtocolError::DelimiterNotFound)?;
        self.read(at + 1)
    }

    /// Next unread byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.mac_state == MacState::Pending {
            return None;
        }
        self.payload.get(self.cursor).copied()
    }

    pub fn is_consumed(&self) -> bool {
        self.cursor == self.payload.len()
    }

    /// Split into the parts a reassembler stores: last flag, sequence,
    /// payload and MAC data. The reassembler verifies again on read.
    pub(crate) fn into_fragment(self) -> (bool, u16, Bytes, Option<MacBlock>) {
        let is_last = self.is_last();
        let seq = self.seq();
        (is_last, seq, self.payload, self.mac)
    }
}

/// Parse key ids and the MAC block starting at `offset`.
fn read_security(
    datagram: &Bytes,
    offset: usize,
    flags: SecurityFlags,
    mac_len: usize,
    enc_len: usize,
) -> Result<SecurityExtras> {
    let has_mac = flags.contains(SecurityFlags::MAC);
    let has_enc = flags.contains(SecurityFlags::ENCRYPTION);

    if has_mac && mac_len == 0 {
        warn!("Incorrect MAC header information");
        return Err(ProtocolError::MalformedSecurityHeader(
            constants::ERR_MAC_WITHOUT_KEY_ID,
        ));
    }
    if has_enc && enc_len == 0 {
        warn!("Incorrect encryption header information");
        return Err(ProtocolError::MalformedSecurityHeader(
            constants::ERR_ENC_WITHOUT_KEY_ID,
        ));
    }
    if (!has_mac && mac_len > 0) || (!has_enc && enc_len > 0) {
        return Err(ProtocolError::MalformedSecurityHeader(
            constants::ERR_KEY_ID_WITHOUT_FLAG,
        ));
    }

    let mac_size = if has_mac { MAC_SIZE } else { 0 };
    let payload_start = offset + mac_len + mac_size + enc_len;
    if payload_start > datagram.len() {
        return Err(ProtocolError::MalformedSecurityHeader(
            constants::ERR_EXTRAS_EXCEED_BODY,
        ));
    }

    let key_id = |range: std::ops::Range<usize>| -> Result<Option<String>> {
        if range.is_empty() {
            return Ok(None);
        }
        String::from_utf8(datagram[range].to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::MalformedSecurityHeader(constants::ERR_KEY_ID_NOT_UTF8))
    };

    let mac_id_end = offset + mac_len;
    let enc_start = mac_id_end + mac_size;
    let mac_key_id = key_id(offset..mac_id_end)?;
    let encryption_key_id = key_id(enc_start..payload_start)?;

    let mac = if has_mac {
        let mut tag = [0u8; MAC_SIZE];
        tag.copy_from_slice(&datagram[mac_id_end..enc_start]);
        let mut header_extra = BytesMut::with_capacity(mac_id_end + enc_len);
        header_extra.put_slice(&datagram[..mac_id_end]);
        header_extra.put_slice(&datagram[enc_start..payload_start]);
        Some(MacBlock::new(tag, header_extra.freeze()))
    } else {
        None
    };

    Ok(SecurityExtras {
        mac_key_id,
        encryption_key_id,
        mac,
        payload_start,
    })
}
