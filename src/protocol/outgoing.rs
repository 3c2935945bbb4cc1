//! # Outgoing Message Assembly
//!
//! Splits a byte stream into packets that share one security configuration
//! and sends them as one logical message.
//!
//! A message that fits in one packet goes out in the short format. Longer
//! messages are numbered from 0 with the final packet flagged last. A failed
//! send discards the whole message; there is no retry at this layer.

use crate::config::{
    clamp_fragment_size, FragmentConfig, HEADER_SIZE, MAX_PACKETS_PER_MESSAGE,
};
use crate::core::header::MessageId;
use crate::core::mac::{MacConfig, MacProvider};
use crate::core::packet::{reserved_for, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::DatagramTransport;
use crate::utils::metrics::{SenderMetrics, Timer};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug)]
pub struct OutgoingMessage {
    packets: VecDeque<Packet>,
    fragment_size: usize,
    pending_fragment_size: Option<usize>,
    mac: Option<MacConfig>,
    encryption_key_id: Option<String>,
    metrics: SenderMetrics,
}

impl Default for OutgoingMessage {
    fn default() -> Self {
        Self::with_config(&FragmentConfig::default())
    }
}

impl OutgoingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &FragmentConfig) -> Self {
        Self {
            packets: VecDeque::new(),
            fragment_size: clamp_fragment_size(config.fragment_size),
            pending_fragment_size: None,
            mac: None,
            encryption_key_id: None,
            metrics: SenderMetrics::new(),
        }
    }

    /// Datagram size packets are currently cut to, header included.
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Change the datagram size. The value is clamped to the supported range
    /// and takes effect now if the message is empty, otherwise at the next
    /// reset. Returns the clamped size.
    pub fn set_fragment_size(&mut self, size: usize) -> usize {
        let clamped = clamp_fragment_size(size);
        if self.is_empty() {
            self.packets.clear();
            self.fragment_size = clamped;
            self.pending_fragment_size = None;
        } else {
            self.pending_fragment_size = Some(clamped);
        }
        clamped
    }

    /// Body bytes per packet, security reservation included.
    fn packet_capacity(&self) -> usize {
        self.fragment_size - HEADER_SIZE
    }

    /// Payload bytes per packet under the current security configuration.
    pub fn payload_per_packet(&self) -> usize {
        self.packet_capacity()
            .saturating_sub(reserved_for(self.mac.as_ref(), self.encryption_key_id.as_deref()))
    }

    /// Authenticate every packet of this and later messages.
    pub fn enable_authentication(
        &mut self,
        provider: Arc<dyn MacProvider>,
        key_id: &str,
    ) -> Result<()> {
        let mac = Some(MacConfig::new(provider, key_id));
        let encryption_key_id = self.encryption_key_id.clone();
        self.configure(mac, encryption_key_id)
    }

    /// Tag every packet of this and later messages with an encryption key id.
    pub fn enable_encryption_id(&mut self, key_id: &str) -> Result<()> {
        let mac = self.mac.clone();
        self.configure(mac, Some(key_id.to_string()))
    }

    fn configure(
        &mut self,
        mac: Option<MacConfig>,
        encryption_key_id: Option<String>,
    ) -> Result<()> {
        if !self.is_empty() {
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
        if reserved >= self.packet_capacity() {
            return Err(ProtocolError::OversizedPacket(reserved));
        }

        self.packets.clear();
        self.mac = mac;
        self.encryption_key_id = encryption_key_id;
        Ok(())
    }

    pub fn mac_key_id(&self) -> Option<&str> {
        self.mac.as_ref().map(MacConfig::key_id)
    }

    pub fn encryption_key_id(&self) -> Option<&str> {
        self.encryption_key_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.iter().all(Packet::is_empty)
    }

    /// Payload bytes appended so far.
    pub fn len(&self) -> usize {
        self.packets.iter().map(Packet::len).sum()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn packets(&self) -> impl ExactSizeIterator<Item = &Packet> {
        self.packets.iter()
    }

    fn new_packet(&self) -> Result<Packet> {
        let mut packet = Packet::with_capacity(self.packet_capacity())?;
        packet.set_security(self.mac.clone(), self.encryption_key_id.clone())?;
        Ok(packet)
    }

    /// Append `data`, opening new packets as the tail fills.
    ///
    /// Nothing is appended if the message would need more packets than a
    /// 16-bit sequence number can address.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let tail_room = self.packets.back().map_or(0, Packet::remaining);
        let free_packets = MAX_PACKETS_PER_MESSAGE - self.packets.len();
        let room = tail_room + free_packets * self.payload_per_packet();
        if data.len() > room {
            return Err(ProtocolError::MessageTooLarge {
                attempted: self.len() + data.len(),
                limit: self.len() + room,
            });
        }

        let mut rest = data;
        while !rest.is_empty() {
            if self.packets.back().map_or(true, Packet::is_full) {
                let packet = self.new_packet()?;
                self.packets.try_reserve(1)?;
                self.packets.push_back(packet);
            }
            if let Some(tail) = self.packets.back_mut() {
                let taken = tail.append(rest);
                rest = &rest[taken..];
            }
        }
        Ok(())
    }

    /// Send every packet to `destination` and reset.
    ///
    /// Returns the number of bytes put on the wire; an empty message sends
    /// nothing. On a transport error or a short write the remaining packets
    /// are discarded and the message is reset.
    #[instrument(
        skip(self, transport, message_id),
        fields(packets = self.packets.len(), message_id = %message_id)
    )]
    pub fn send<T>(
        &mut self,
        transport: &mut T,
        destination: SocketAddr,
        message_id: MessageId,
    ) -> Result<usize>
    where
        T: DatagramTransport + ?Sized,
    {
        if self.is_empty() {
            self.reset();
            return Ok(0);
        }

        let _timer = Timer::start("send_message");
        let payload_len = self.len();
        let mut sent = 0;
        let short = self.packets.len() == 1
            && self
                .packets
                .front()
                .is_some_and(|p| !p.is_ambiguous_as_short());

        if short {
            if let Some(packet) = self.packets.pop_front() {
                let datagram = packet.encode_short();
                sent += self.transmit(transport, &datagram, destination)?;
            }
        } else {
            let last = self.packets.len() - 1;
            let mut seq = 0;
            while let Some(packet) = self.packets.pop_front() {
                let datagram = packet.encode(seq == last, seq as u16, message_id);
                sent += self.transmit(transport, &datagram, destination)?;
                seq += 1;
            }
        }

        self.metrics.message_sent(payload_len as u64);
        debug!(bytes = sent, payload = payload_len, "Message sent");
        self.reset();
        Ok(sent)
    }

    fn transmit<T>(
        &mut self,
        transport: &mut T,
        datagram: &[u8],
        destination: SocketAddr,
    ) -> Result<usize>
    where
        T: DatagramTransport + ?Sized,
    {
        match transport.send_datagram(datagram, destination) {
            Ok(n) if n == datagram.len() => {
                self.metrics.packet_sent(n as u64);
                debug!(len = n, %destination, "Datagram sent");
                Ok(n)
            }
            Ok(n) => {
                warn!(sent = n, len = datagram.len(), %destination, "Short datagram write");
                self.abort();
                Err(ProtocolError::TransportError(format!(
                    "{}: {n} of {} bytes",
                    constants::ERR_SHORT_WRITE,
                    datagram.len()
                )))
            }
            Err(e) => {
                warn!(error = %e, %destination, "Datagram send failed");
                self.abort();
                Err(ProtocolError::TransportError(e.to_string()))
            }
        }
    }

    fn abort(&mut self) {
        self.metrics.send_failed();
        self.reset();
    }

    /// Drop all packets so the next message starts fresh. Security
    /// configuration is kept; a deferred fragment size takes effect.
    pub fn reset(&mut self) {
        self.packets.clear();
        if let Some(size) = self.pending_fragment_size.take() {
            self.fragment_size = size;
        }
    }

    /// Mean payload size of fully sent messages, in bytes.
    pub fn average_message_size(&self) -> u64 {
        self.metrics.average_message_size()
    }

    pub fn metrics(&self) -> &SenderMetrics {
        &self.metrics
    }
}
