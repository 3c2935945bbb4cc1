#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the datagram codec and message layer
//! Covers boundary sizes, malformed wire data, sequencing limits and misuse

use bytes::{BufMut, Bytes, BytesMut};
use safe_datagram::config::{
    ReassemblyConfig, HEADER_SIZE, MAC_SIZE, MAX_FRAGMENT_SIZE, MAX_PACKETS_PER_MESSAGE,
    MIN_FRAGMENT_SIZE, SECURITY_TAG, USABLE_PACKET_SIZE,
};
use safe_datagram::core::header::{MessageId, PacketHeader, SecurityFlags};
use safe_datagram::core::mac::HmacSha256Mac;
use safe_datagram::core::packet::{IncomingPacket, Packet, WireFormat};
use safe_datagram::error::ProtocolError;
use safe_datagram::protocol::{AddOutcome, IncomingMessage, MessageState, OutgoingMessage};
use safe_datagram::transport::LoopbackTransport;
use std::net::SocketAddr;

fn id() -> MessageId {
    MessageId::new(0x7f00_0001, 1, 2, 3)
}

fn long_header(body_len: u16, flags: SecurityFlags, mac_len: u16, enc_len: u16) -> BytesMut {
    let mut buf = BytesMut::new();
    PacketHeader {
        is_last: true,
        seq: 0,
        body_len,
        message_id: id(),
        flags,
        mac_key_id_len: mac_len,
        enc_key_id_len: enc_len,
    }
    .encode(&mut buf);
    buf
}

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_datagram_is_empty_short_message() {
    let mut packet = IncomingPacket::decode(Bytes::new()).unwrap();
    assert_eq!(packet.format(), WireFormat::Short);
    assert_eq!(packet.payload_len(), 0);
    assert!(packet.is_consumed());
    assert_eq!(packet.peek(), None);
    assert!(packet.read(0).unwrap().is_empty());
}

#[test]
fn test_bare_magic_is_truncated() {
    assert!(matches!(
        IncomingPacket::decode(Bytes::from_static(b"MaGic6.0")),
        Err(ProtocolError::TruncatedPacket {
            expected: HEADER_SIZE,
            actual: 8
        })
    ));
}

#[test]
fn test_declared_body_longer_than_datagram() {
    let mut wire = long_header(10, SecurityFlags::empty(), 0, 0);
    wire.put_slice(b"12345");
    assert!(matches!(
        IncomingPacket::decode(wire.freeze()),
        Err(ProtocolError::TruncatedPacket {
            expected,
            actual
        }) if expected == HEADER_SIZE + 10 && actual == HEADER_SIZE + 5
    ));
}

#[test]
fn test_mac_flag_without_key_id() {
    let mut wire = long_header(MAC_SIZE as u16, SecurityFlags::MAC, 0, 0);
    wire.put_bytes(0, MAC_SIZE);
    assert!(matches!(
        IncomingPacket::decode(wire.freeze()),
        Err(ProtocolError::MalformedSecurityHeader(_))
    ));
}

#[test]
fn test_encryption_length_without_flag() {
    let mut wire = long_header(4, SecurityFlags::empty(), 0, 4);
    wire.put_slice(b"enc1");
    assert!(matches!(
        IncomingPacket::decode(wire.freeze()),
        Err(ProtocolError::MalformedSecurityHeader(_))
    ));
}

#[test]
fn test_key_id_must_be_utf8() {
    let mut wire = long_header(2, SecurityFlags::ENCRYPTION, 0, 2);
    wire.put_slice(&[0xff, 0xfe]);
    assert!(matches!(
        IncomingPacket::decode(wire.freeze()),
        Err(ProtocolError::MalformedSecurityHeader(_))
    ));
}

#[test]
fn test_short_security_lengths_exceed_datagram() {
    let mut wire = BytesMut::new();
    wire.put_slice(&SECURITY_TAG);
    wire.put_u16(SecurityFlags::MAC.bits());
    wire.put_u16(40);
    wire.put_u16(0);
    wire.put_slice(b"tiny");
    assert!(matches!(
        IncomingPacket::decode(wire.freeze()),
        Err(ProtocolError::MalformedSecurityHeader(_))
    ));
}

#[test]
fn test_short_tag_without_full_prefix_is_payload() {
    let mut packet = IncomingPacket::decode(Bytes::from_static(b"CRAP!")).unwrap();
    assert!(!packet.has_mac());
    assert_eq!(&packet.read(5).unwrap()[..], b"CRAP!");
}

#[test]
fn test_packet_capacity_boundaries() {
    let mut packet = Packet::new();
    assert_eq!(packet.payload_capacity(), USABLE_PACKET_SIZE);
    assert_eq!(packet.append(&vec![1u8; USABLE_PACKET_SIZE + 10]), USABLE_PACKET_SIZE);
    assert!(packet.is_full());

    let wire = packet.encode(true, 0, id());
    assert_eq!(wire.len(), HEADER_SIZE + USABLE_PACKET_SIZE);
}

#[test]
fn test_oversized_packet_capacity_rejected() {
    assert!(matches!(
        Packet::with_capacity(u16::MAX as usize + 1),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_reenabling_authentication_replaces_key_before_payload() {
    let mut packet = Packet::new();
    packet
        .enable_authentication(HmacSha256Mac::shared(b"a").unwrap(), "first")
        .unwrap();
    packet
        .enable_authentication(HmacSha256Mac::shared(b"b").unwrap(), "second-key")
        .unwrap();
    assert_eq!(packet.mac_key_id(), Some("second-key"));
    assert_eq!(packet.reserved(), "second-key".len() + MAC_SIZE);

    packet.append(b"x");
    assert!(matches!(
        packet.enable_authentication(HmacSha256Mac::shared(b"c").unwrap(), "third"),
        Err(ProtocolError::SecurityConfigAfterPayload)
    ));
    assert_eq!(packet.mac_key_id(), Some("second-key"));
}

// ============================================================================
// OUTGOING MESSAGE EDGE CASES
// ============================================================================

#[test]
fn test_fragment_size_is_clamped() {
    let mut outgoing = OutgoingMessage::new();
    assert_eq!(outgoing.set_fragment_size(5), MIN_FRAGMENT_SIZE);
    assert_eq!(outgoing.payload_per_packet(), 1);
    assert_eq!(outgoing.set_fragment_size(usize::MAX), MAX_FRAGMENT_SIZE);
}

#[test]
fn test_message_beyond_sequence_space_rejected() {
    let mut outgoing = OutgoingMessage::new();
    outgoing.set_fragment_size(MIN_FRAGMENT_SIZE);

    let limit = MAX_PACKETS_PER_MESSAGE;
    assert!(matches!(
        outgoing.append(&vec![0u8; limit + 1]),
        Err(ProtocolError::MessageTooLarge { attempted, limit: l }) if attempted == limit + 1 && l == limit
    ));
    assert!(outgoing.is_empty());

    outgoing.append(&vec![0u8; limit]).unwrap();
    assert_eq!(outgoing.packet_count(), limit);
    assert!(outgoing.append(b"x").is_err());
}

#[test]
fn test_authentication_too_large_for_fragment() {
    let mut outgoing = OutgoingMessage::new();
    outgoing.set_fragment_size(HEADER_SIZE + MAC_SIZE);
    assert!(matches!(
        outgoing.enable_authentication(HmacSha256Mac::shared(b"k").unwrap(), "id"),
        Err(ProtocolError::OversizedPacket(_))
    ));
    assert_eq!(outgoing.mac_key_id(), None);
}

#[test]
fn test_highest_sequence_number_is_reachable() {
    let mut outgoing = OutgoingMessage::new();
    outgoing.set_fragment_size(MIN_FRAGMENT_SIZE);
    outgoing.append(&vec![7u8; MAX_PACKETS_PER_MESSAGE]).unwrap();

    let mut transport = LoopbackTransport::new();
    outgoing
        .send(&mut transport, SocketAddr::from(([127, 0, 0, 1], 2)), id())
        .unwrap();

    let last = transport.take_datagrams().pop().unwrap();
    let packet = IncomingPacket::decode(last).unwrap();
    assert_eq!(packet.seq(), u16::MAX);
    assert!(packet.is_last());
}

// ============================================================================
// INCOMING MESSAGE EDGE CASES
// ============================================================================

#[test]
fn test_last_packet_first_at_highest_sequence() {
    let mut message = IncomingMessage::new(id(), &ReassemblyConfig::default()).unwrap();
    let outcome = message
        .add_fragment(true, u16::MAX, Bytes::from_static(b"end"), None)
        .unwrap();
    assert_eq!(outcome, AddOutcome::Accepted);
    assert_eq!(message.last_sequence(), Some(u16::MAX));
    assert_eq!(
        message.buffered_pages(),
        MAX_PACKETS_PER_MESSAGE.div_ceil(ReassemblyConfig::default().page_slots)
    );
}

#[test]
fn test_single_slot_pages() {
    let config = ReassemblyConfig {
        page_slots: 1,
        ..ReassemblyConfig::default()
    };
    let mut message = IncomingMessage::new(id(), &config).unwrap();
    message
        .add_fragment(false, 1, Bytes::from_static(b"b"), None)
        .unwrap();
    message
        .add_fragment(true, 2, Bytes::from_static(b"c\n"), None)
        .unwrap();
    message
        .add_fragment(false, 0, Bytes::from_static(b"a"), None)
        .unwrap();

    assert_eq!(&message.read_until(b'\n').unwrap()[..], b"abc\n");
    assert_eq!(message.buffered_pages(), 0);
}

#[test]
fn test_second_last_packet_rejected() {
    let mut message = IncomingMessage::new(id(), &ReassemblyConfig::default()).unwrap();
    message
        .add_fragment(true, 4, Bytes::from_static(b"x"), None)
        .unwrap();
    assert!(matches!(
        message.add_fragment(true, 6, Bytes::from_static(b"y"), None),
        Err(ProtocolError::SequenceOutOfRange { seq: 6, last: 4 })
    ));
    // repeating the same last packet is only a duplicate
    assert_eq!(
        message
            .add_fragment(true, 4, Bytes::from_static(b"x"), None)
            .unwrap(),
        AddOutcome::Duplicate
    );
}

#[test]
fn test_read_zero_before_completion_fails() {
    let mut message = IncomingMessage::new(id(), &ReassemblyConfig::default()).unwrap();
    assert!(matches!(
        message.read(0),
        Err(ProtocolError::MessageIncomplete)
    ));
    assert!(matches!(message.peek(), Err(ProtocolError::MessageIncomplete)));
}

#[test]
fn test_delimiter_absent_consumes_nothing() {
    let mut message = IncomingMessage::new(id(), &ReassemblyConfig::default()).unwrap();
    message
        .add_fragment(false, 0, Bytes::from_static(b"no "), None)
        .unwrap();
    message
        .add_fragment(true, 1, Bytes::from_static(b"newline"), None)
        .unwrap();

    assert!(matches!(
        message.read_until(b'\n'),
        Err(ProtocolError::DelimiterNotFound)
    ));
    assert_eq!(message.remaining(), 10);
    assert_eq!(message.state(), MessageState::Complete);
    assert_eq!(&message.read(10).unwrap()[..], b"no newline");
}

#[test]
fn test_zero_length_last_packet() {
    let mut message = IncomingMessage::new(id(), &ReassemblyConfig::default()).unwrap();
    message
        .add_fragment(false, 0, Bytes::from_static(b"body"), None)
        .unwrap();
    assert_eq!(
        message.add_fragment(true, 1, Bytes::new(), None).unwrap(),
        AddOutcome::Completed
    );
    assert_eq!(message.message_len(), 4);
    assert_eq!(&message.read(4).unwrap()[..], b"body");
    assert!(message.is_fully_consumed());
}
