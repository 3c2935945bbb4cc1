//! # Incoming Message Reassembly
//!
//! Buffers the packets of one message as they arrive, in any order and with
//! duplicates, and serves sequential reads once every packet is present.
//!
//! ## Lifecycle
//! ```text
//! Collecting --(last + 1 distinct packets)--> Complete --(all bytes read)--> Consumed
//!                                                |
//!                                                +--(MAC failure)--> Corrupt
//! ```
//!
//! Pages live in a ring whose front is the page holding the read cursor.
//! A page is dropped as soon as the reader drains it, so memory held is
//! proportional to unread data.
//!
//! MACs are checked lazily: a slot is verified the first time a read touches
//! it, and no byte of a read is released until every slot it spans passed.

use crate::config::{ReassemblyConfig, MAX_PACKETS_PER_MESSAGE};
use crate::core::header::MessageId;
use crate::core::mac::MacProvider;
use crate::core::packet::{IncomingPacket, MacBlock};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::directory::{DirectoryPage, Fragment, Slot};
use crate::utils::metrics::ReceiverMetrics;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Waiting for packets.
    Collecting,
    /// Every packet arrived; reads allowed.
    Complete,
    /// Every byte handed to the reader.
    Consumed,
    /// A MAC check failed; nothing more will be released.
    Corrupt,
}

/// Result of offering a packet to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    /// The packet completed the message.
    Completed,
    /// The slot was already filled or the message had already completed;
    /// the packet was dropped.
    Duplicate,
}

pub struct IncomingMessage {
    id: MessageId,
    page_slots: usize,
    max_message_size: usize,
    stale_timeout: Duration,
    pages: VecDeque<DirectoryPage>,
    head_index: usize,
    cursor: usize,
    state: MessageState,
    received: usize,
    highest_seq: Option<u16>,
    last_seq: Option<u16>,
    msg_len: usize,
    consumed: usize,
    last_arrival: Instant,
    mac_key_id: Option<String>,
    encryption_key_id: Option<String>,
    verifier: Option<Arc<dyn MacProvider>>,
    scratch: BytesMut,
    metrics: ReceiverMetrics,
}

impl IncomingMessage {
    pub fn new(id: MessageId, config: &ReassemblyConfig) -> Result<Self> {
        if config.page_slots == 0 || config.page_slots > MAX_PACKETS_PER_MESSAGE {
            return Err(ProtocolError::ConfigError(format!(
                "Invalid page slot count: {}",
                config.page_slots
            )));
        }
        Ok(Self {
            id,
            page_slots: config.page_slots,
            max_message_size: config.max_message_size,
            stale_timeout: config.stale_timeout,
            pages: VecDeque::new(),
            head_index: 0,
            cursor: 0,
            state: MessageState::Collecting,
            received: 0,
            highest_seq: None,
            last_seq: None,
            msg_len: 0,
            consumed: 0,
            last_arrival: Instant::now(),
            mac_key_id: None,
            encryption_key_id: None,
            verifier: None,
            scratch: BytesMut::new(),
            metrics: ReceiverMetrics::new(),
        })
    }

    /// Start a message from the first packet seen for its id.
    ///
    /// The packet may carry any sequence number; pages up to the one holding
    /// it are allocated.
    pub fn from_packet(
        packet: IncomingPacket,
        config: &ReassemblyConfig,
    ) -> Result<(Self, AddOutcome)> {
        let id = packet.message_id().unwrap_or_default();
        let mut message = Self::new(id, config)?;
        let outcome = message.add_packet(packet)?;
        Ok((message, outcome))
    }

    /// Offer a decoded packet. Short packets count as sequence 0, last.
    ///
    /// A short packet is authenticated here when a verifier is already
    /// installed; failure marks the message corrupt. Every other packet is
    /// checked when a read first reaches it. Key ids are taken from the
    /// first packet that is stored.
    pub fn add_packet(&mut self, mut packet: IncomingPacket) -> Result<AddOutcome> {
        if let Some(found) = packet.message_id() {
            if found != self.id {
                self.metrics.rejected();
                return Err(ProtocolError::MessageIdMismatch {
                    expected: self.id,
                    found,
                });
            }
        }
        if packet.is_short() && self.state == MessageState::Collecting {
            if let Some(verifier) = self.verifier.clone() {
                if let Err(e) = packet.verify_mac(Some(verifier.as_ref())) {
                    warn!(message_id = %self.id, error = %e, "Short message failed authentication");
                    self.metrics.mac_failed();
                    self.state = MessageState::Corrupt;
                    return Err(e);
                }
            }
        }
        let mac_key_id = packet.mac_key_id().map(str::to_owned);
        let encryption_key_id = packet.encryption_key_id().map(str::to_owned);

        let (is_last, seq, payload, mac) = packet.into_fragment();
        let outcome = self.add_fragment(is_last, seq, payload, mac)?;
        if outcome != AddOutcome::Duplicate {
            if self.mac_key_id.is_none() {
                self.mac_key_id = mac_key_id;
            }
            if self.encryption_key_id.is_none() {
                self.encryption_key_id = encryption_key_id;
            }
        }
        Ok(outcome)
    }

    /// Offer one fragment by its parts.
    pub fn add_fragment(
        &mut self,
        is_last: bool,
        seq: u16,
        payload: Bytes,
        mac: Option<MacBlock>,
    ) -> Result<AddOutcome> {
        self.last_arrival = Instant::now();
        if self.state != MessageState::Collecting {
            trace!(message_id = %self.id, seq, "Packet for finished message dropped");
            self.metrics.duplicate();
            return Ok(AddOutcome::Duplicate);
        }
        if let Err(e) = self.check_sequence(is_last, seq) {
            self.metrics.rejected();
            return Err(e);
        }

        let len = payload.len();
        let offset = seq as usize % self.page_slots;
        let page = self.page_mut(seq as usize / self.page_slots)?;
        if !page.slot(offset).is_empty() {
            trace!(message_id = %self.id, seq, "Duplicate packet dropped");
            self.metrics.duplicate();
            return Ok(AddOutcome::Duplicate);
        }

        let attempted = self.msg_len + len;
        if attempted > self.max_message_size {
            self.metrics.rejected();
            return Err(ProtocolError::MessageTooLarge {
                attempted,
                limit: self.max_message_size,
            });
        }

        self.page_mut(seq as usize / self.page_slots)?
            .insert(offset, Fragment::new(payload, mac));
        self.received += 1;
        self.msg_len = attempted;
        self.highest_seq = Some(self.highest_seq.map_or(seq, |h| h.max(seq)));
        if is_last {
            self.last_seq = Some(seq);
        }
        self.metrics.packet_accepted();

        match self.last_seq {
            Some(last) if self.received == last as usize + 1 => {
                self.state = MessageState::Complete;
                self.head_index = 0;
                self.cursor = 0;
                debug!(
                    message_id = %self.id,
                    packets = self.received,
                    bytes = self.msg_len,
                    "Message complete"
                );
                self.settle();
                if self.msg_len == 0 {
                    self.finish();
                }
                Ok(AddOutcome::Completed)
            }
            _ => Ok(AddOutcome::Accepted),
        }
    }

    /// Reject sequencing that would make completion ambiguous.
    fn check_sequence(&self, is_last: bool, seq: u16) -> Result<()> {
        if let Some(last) = self.last_seq {
            if seq > last || (is_last && seq != last) {
                return Err(ProtocolError::SequenceOutOfRange { seq, last });
            }
        }
        if is_last {
            if let Some(highest) = self.highest_seq.filter(|&h| h > seq) {
                return Err(ProtocolError::SequenceOutOfRange {
                    seq: highest,
                    last: seq,
                });
            }
        }
        Ok(())
    }

    /// Page `index`, allocating it and any page before it. Only used while
    /// collecting, when the ring still starts at page 0.
    fn page_mut(&mut self, index: usize) -> Result<&mut DirectoryPage> {
        while self.pages.len() <= index {
            self.pages.try_reserve(1)?;
            self.pages
                .push_back(DirectoryPage::new(self.pages.len(), self.page_slots)?);
        }
        Ok(&mut self.pages[index])
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, MessageState::Complete | MessageState::Consumed)
    }

    /// Every received byte has been handed to the reader.
    pub fn is_fully_consumed(&self) -> bool {
        self.state == MessageState::Consumed
    }

    /// Distinct packets stored so far.
    pub fn received_count(&self) -> usize {
        self.received
    }

    /// Sequence number of the last packet, once it has arrived.
    pub fn last_sequence(&self) -> Option<u16> {
        self.last_seq
    }

    /// Payload bytes received so far.
    pub fn message_len(&self) -> usize {
        self.msg_len
    }

    /// Bytes not yet handed to the reader.
    pub fn remaining(&self) -> usize {
        self.msg_len - self.consumed
    }

    /// Pages currently held.
    pub fn buffered_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn last_arrival(&self) -> Instant {
        self.last_arrival
    }

    /// Idle time after which a collecting message is abandoned.
    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Whether no packet arrived within the configured timeout before `now`.
    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_arrival) >= self.stale_timeout
    }

    /// Key id of the MAC the sender used, for looking up the verifier.
    pub fn mac_key_id(&self) -> Option<&str> {
        self.mac_key_id.as_deref()
    }

    pub fn encryption_key_id(&self) -> Option<&str> {
        self.encryption_key_id.as_deref()
    }

    /// Install the MAC used to check slots as they are read. Once installed,
    /// a slot without a MAC is a security failure.
    pub fn set_mac_verifier(&mut self, provider: Arc<dyn MacProvider>) {
        self.verifier = Some(provider);
    }

    pub fn metrics(&self) -> &ReceiverMetrics {
        &self.metrics
    }

    fn check_readable(&self) -> Result<()> {
        match self.state {
            MessageState::Collecting => Err(ProtocolError::MessageIncomplete),
            MessageState::Corrupt => Err(ProtocolError::MessageCorrupt),
            MessageState::Complete | MessageState::Consumed => Ok(()),
        }
    }

    /// Consume the next `size` bytes.
    ///
    /// The result borrows the stored payload when one fragment covers the
    /// span, otherwise it is copied.
    pub fn read(&mut self, size: usize) -> Result<Bytes> {
        self.check_readable()?;
        let available = self.remaining();
        if size > available {
            return Err(ProtocolError::InsufficientData {
                requested: size,
                available,
            });
        }
        if size == 0 {
            return Ok(Bytes::new());
        }
        self.verify_ahead(size)?;
        Ok(self.take(size))
    }

    /// Fill `buf` from the next `buf.len()` bytes.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let bytes = self.read(buf.len())?;
        if bytes.len() != buf.len() {
            return Err(ProtocolError::InsufficientData {
                requested: buf.len(),
                available: bytes.len(),
            });
        }
        buf.copy_from_slice(&bytes);
        Ok(())
    }

    /// Consume up to and including the next `delim` byte.
    ///
    /// Spans inside one fragment are returned in place; spans crossing
    /// fragments are assembled in a scratch buffer that the next read
    /// replaces. Nothing is consumed when the delimiter is absent.
    pub fn read_until(&mut self, delim: u8) -> Result<Bytes> {
        self.check_readable()?;
        let mut scanned = 0;
        let (mut page, mut offset) = (0, self.cursor);
        while page < self.pages.len() {
            if offset == self.page_slots {
                page += 1;
                offset = 0;
                continue;
            }
            self.verify_slot(page, offset)?;
            let (found, len) = match self.pages[page].slot(offset) {
                Slot::Verified(bytes) => (bytes.iter().position(|&b| b == delim), bytes.len()),
                Slot::Empty | Slot::Filled(_) => (None, 0),
            };
            if let Some(at) = found {
                return Ok(self.take(scanned + at + 1));
            }
            scanned += len;
            offset += 1;
        }
        Err(ProtocolError::DelimiterNotFound)
    }

    /// Next unread byte without consuming it.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        self.check_readable()?;
        if self.remaining() == 0 {
            return Ok(None);
        }
        self.verify_ahead(1)?;
        self.settle();
        Ok(match self.pages.front().map(|p| p.slot(self.cursor)) {
            Some(Slot::Verified(bytes)) => bytes.first().copied(),
            _ => None,
        })
    }

    /// Verify slots from the cursor until they hold `needed` bytes.
    fn verify_ahead(&mut self, needed: usize) -> Result<()> {
        let mut covered = 0;
        let (mut page, mut offset) = (0, self.cursor);
        while covered < needed && page < self.pages.len() {
            if offset == self.page_slots {
                page += 1;
                offset = 0;
                continue;
            }
            self.verify_slot(page, offset)?;
            covered += self.pages[page].slot(offset).len();
            offset += 1;
        }
        Ok(())
    }

    /// Check one stored fragment and release it for reading.
    fn verify_slot(&mut self, page: usize, offset: usize) -> Result<()> {
        let seq = ((self.head_index + page) * self.page_slots + offset) as u16;
        let verifier = self.verifier.as_deref();
        let slot = self.pages[page].slot_mut(offset);
        let Slot::Filled(fragment) = slot else {
            return Ok(());
        };

        let verdict = match (&fragment.mac, verifier) {
            (None, None) => Ok(()),
            // leave the slot as is; the caller may install the key and retry
            (Some(_), None) => return Err(ProtocolError::MacKeyUnavailable),
            (None, Some(_)) => Err(ProtocolError::SecurityError(
                constants::ERR_MAC_MISSING.to_string(),
            )),
            (Some(mac), Some(provider)) => {
                if mac.verify(provider, &fragment.payload) {
                    self.metrics.mac_verified();
                    Ok(())
                } else {
                    Err(ProtocolError::MacVerificationFailed { seq })
                }
            }
        };

        match verdict {
            Ok(()) => {
                let payload = std::mem::take(&mut fragment.payload);
                *slot = Slot::Verified(payload);
                Ok(())
            }
            Err(e) => {
                warn!(message_id = %self.id, seq, error = %e, "Message marked corrupt");
                self.metrics.mac_failed();
                self.state = MessageState::Corrupt;
                Err(e)
            }
        }
    }

    /// Hand out `size` already verified bytes and advance the cursor.
    fn take(&mut self, size: usize) -> Bytes {
        let out = self.copy_span(size);
        self.consumed += out.len();
        self.metrics.bytes_read(out.len() as u64);
        self.settle();
        if self.state == MessageState::Complete && self.consumed == self.msg_len {
            self.finish();
        }
        out
    }

    fn copy_span(&mut self, size: usize) -> Bytes {
        self.settle();
        if let Some(page) = self.pages.front_mut() {
            if let Slot::Verified(bytes) = page.slot_mut(self.cursor) {
                if bytes.len() >= size {
                    return bytes.split_to(size);
                }
            }
        }

        self.scratch.clear();
        self.scratch.reserve(size);
        let mut left = size;
        while left > 0 {
            let Some(page) = self.pages.front_mut() else {
                break;
            };
            let Slot::Verified(bytes) = page.slot_mut(self.cursor) else {
                break;
            };
            let n = left.min(bytes.len());
            self.scratch.extend_from_slice(&bytes[..n]);
            bytes.advance(n);
            left -= n;
            self.settle();
        }
        self.scratch.split().freeze()
    }

    fn finish(&mut self) {
        debug!(message_id = %self.id, bytes = self.msg_len, "Message consumed");
        self.state = MessageState::Consumed;
        self.pages.clear();
    }

    /// Release drained slots and pages in front of the cursor.
    fn settle(&mut self) {
        while let Some(page) = self.pages.front_mut() {
            if self.cursor == page.capacity() {
                self.pages.pop_front();
                self.head_index += 1;
                self.cursor = 0;
                continue;
            }
            let slot = page.slot_mut(self.cursor);
            if !matches!(slot, Slot::Verified(bytes) if bytes.is_empty()) {
                break;
            }
            *slot = Slot::Empty;
            self.cursor += 1;
        }
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("received", &self.received)
            .field("last_seq", &self.last_seq)
            .field("msg_len", &self.msg_len)
            .field("consumed", &self.consumed)
            .field("pages", &self.pages.len())
            .field("mac_key_id", &self.mac_key_id)
            .finish_non_exhaustive()
    }
}
