//! Property-based tests using proptest
//!
//! These tests validate fragmentation invariants across randomly generated
//! messages, packet sizes and arrival orders.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use proptest::prelude::*;
use safe_datagram::config::{ReassemblyConfig, HEADER_SIZE};
use safe_datagram::core::header::MessageId;
use safe_datagram::core::mac::HmacSha256Mac;
use safe_datagram::core::packet::{IncomingPacket, Packet};
use safe_datagram::protocol::{AddOutcome, IncomingMessage, MessageState, OutgoingMessage};
use safe_datagram::transport::LoopbackTransport;
use std::net::SocketAddr;

fn message_id() -> MessageId {
    MessageId::new(0x0a00_0002, 77, 1_700_000_000, 9)
}

fn split(data: &[u8], payload: usize) -> Vec<Bytes> {
    let mut outgoing = OutgoingMessage::new();
    outgoing.set_fragment_size(HEADER_SIZE + payload);
    outgoing.append(data).unwrap();
    let mut transport = LoopbackTransport::new();
    outgoing
        .send(&mut transport, SocketAddr::from(([127, 0, 0, 1], 1)), message_id())
        .unwrap();
    transport.take_datagrams()
}

/// Deterministic permutation of `0..len` driven by proptest-chosen keys.
fn permutation(len: usize, keys: &[u32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|&i| keys[i % keys.len()].wrapping_mul(i as u32 + 1));
    order
}

// Property: any arrival order with injected duplicates reassembles the original bytes
proptest! {
    #[test]
    fn prop_reassembly_is_order_independent(
        data in prop::collection::vec(any::<u8>(), 1..6_000),
        payload in 1usize..700,
        page_slots in 1usize..50,
        keys in prop::collection::vec(any::<u32>(), 1..64),
        dup_every in 1usize..5,
    ) {
        let datagrams = split(&data, payload);
        let order = permutation(datagrams.len(), &keys);

        let config = ReassemblyConfig { page_slots, ..ReassemblyConfig::default() };
        let mut message = IncomingMessage::new(message_id(), &config).unwrap();
        let mut completions = 0;
        for (n, &i) in order.iter().enumerate() {
            let outcome = message
                .add_packet(IncomingPacket::decode(datagrams[i].clone()).unwrap())
                .unwrap();
            if outcome == AddOutcome::Completed {
                completions += 1;
            }
            if n % dup_every == 0 {
                let again = message
                    .add_packet(IncomingPacket::decode(datagrams[i].clone()).unwrap())
                    .unwrap();
                prop_assert_eq!(again, AddOutcome::Duplicate);
            }
        }

        prop_assert_eq!(completions, 1);
        prop_assert_eq!(message.received_count(), datagrams.len());
        let out = message.read(data.len()).unwrap();
        prop_assert_eq!(&out[..], &data[..]);
        prop_assert!(message.is_fully_consumed());
    }
}

// Property: a message never completes while any packet below the last is missing
proptest! {
    #[test]
    fn prop_no_completion_with_gap(
        data in prop::collection::vec(any::<u8>(), 2..3_000),
        payload in 1usize..200,
        missing_seed in any::<usize>(),
        keys in prop::collection::vec(any::<u32>(), 1..16),
    ) {
        let datagrams = split(&data, payload);
        prop_assume!(datagrams.len() > 1);
        let missing = missing_seed % datagrams.len();

        let mut message = IncomingMessage::new(message_id(), &ReassemblyConfig::default()).unwrap();
        for i in permutation(datagrams.len(), &keys) {
            if i == missing {
                continue;
            }
            message
                .add_packet(IncomingPacket::decode(datagrams[i].clone()).unwrap())
                .unwrap();
            prop_assert_eq!(message.state(), MessageState::Collecting);
        }
        prop_assert!(message.read(1).is_err());
    }
}

// Property: long-format encoding preserves sequence, last flag and payload
proptest! {
    #[test]
    fn prop_long_format_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..900),
        seq in any::<u16>(),
        is_last in any::<bool>(),
        authenticated in any::<bool>(),
    ) {
        let mac = HmacSha256Mac::shared(b"prop-key").unwrap();
        let mut packet = Packet::new();
        if authenticated {
            packet.enable_authentication(mac.clone(), "prop").unwrap();
        }
        let taken = packet.append(&payload);

        let mut decoded = IncomingPacket::decode(packet.encode(is_last, seq, message_id())).unwrap();
        prop_assert_eq!(decoded.seq(), seq);
        prop_assert_eq!(decoded.is_last(), is_last);
        prop_assert_eq!(decoded.message_id(), Some(message_id()));
        decoded
            .verify_mac(authenticated.then_some(mac.as_ref()))
            .unwrap();
        prop_assert_eq!(&decoded.read(taken).unwrap()[..], &payload[..taken]);
    }
}

// Property: short-format encoding preserves payload, with or without security
proptest! {
    #[test]
    fn prop_short_format_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..900),
        authenticated in any::<bool>(),
        encryption_id in prop::option::of("[a-z0-9]{1,12}"),
    ) {
        let mac = HmacSha256Mac::shared(b"prop-key").unwrap();
        let mut packet = Packet::new();
        if authenticated {
            packet.enable_authentication(mac.clone(), "prop").unwrap();
        }
        if let Some(id) = &encryption_id {
            packet.enable_encryption_id(id).unwrap();
        }
        packet.append(&payload);
        prop_assume!(!packet.is_ambiguous_as_short());

        let mut decoded = IncomingPacket::decode(packet.encode_short()).unwrap();
        prop_assert!(decoded.is_short());
        prop_assert!(decoded.is_last());
        prop_assert_eq!(decoded.seq(), 0);
        prop_assert_eq!(decoded.encryption_key_id(), encryption_id.as_deref());
        decoded
            .verify_mac(authenticated.then_some(mac.as_ref()))
            .unwrap();
        prop_assert_eq!(&decoded.read(payload.len()).unwrap()[..], &payload[..]);
    }
}

// Property: decoding arbitrary bytes never panics
proptest! {
    #[test]
    fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..2_000)) {
        let _ = IncomingPacket::decode(Bytes::from(data));
    }
}

// Property: corrupting a header byte of an authenticated packet is detected
proptest! {
    #[test]
    fn prop_header_tamper_detected(
        payload in prop::collection::vec(any::<u8>(), 1..200),
        position in 8usize..HEADER_SIZE,
        flip in 1u8..=255,
    ) {
        let mac = HmacSha256Mac::shared(b"prop-key").unwrap();
        let mut packet = Packet::new();
        packet.enable_authentication(mac.clone(), "prop").unwrap();
        packet.append(&payload);

        let mut wire = packet.encode(false, 1, message_id()).to_vec();
        wire[position] ^= flip;
        if let Ok(mut decoded) = IncomingPacket::decode(Bytes::from(wire)) {
            prop_assert!(decoded.verify_mac(Some(mac.as_ref())).is_err());
        }
    }
}
