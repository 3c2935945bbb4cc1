use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use safe_datagram::config::HEADER_SIZE;
use safe_datagram::core::header::MessageId;
use safe_datagram::core::mac::HmacSha256Mac;
use safe_datagram::core::packet::{IncomingPacket, Packet};

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [64usize, 512, 969, 8192, 59_000];
    let id = MessageId::new(0x7f00_0001, 1, 1_700_000_000, 1);
    let key = HmacSha256Mac::shared(b"bench key").unwrap();

    for &size in &payload_sizes {
        let payload = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || {
                    let mut packet = Packet::with_capacity(size).unwrap();
                    packet.append(&payload);
                    packet
                },
                |packet| packet.encode(true, 0, id),
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("encode_mac_{size}b"), |b| {
            b.iter_batched(
                || {
                    let mut packet = Packet::with_capacity(size + HEADER_SIZE).unwrap();
                    packet.enable_authentication(key.clone(), "bench").unwrap();
                    packet.append(&payload);
                    packet
                },
                |packet| packet.encode(true, 0, id),
                BatchSize::SmallInput,
            )
        });

        let mut plain = Packet::with_capacity(size).unwrap();
        plain.append(&payload);
        let wire = plain.encode(true, 0, id);
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| {
                let decoded = IncomingPacket::decode(wire.clone());
                assert!(decoded.is_ok());
            })
        });

        let mut signed = Packet::with_capacity(size + HEADER_SIZE).unwrap();
        signed.enable_authentication(key.clone(), "bench").unwrap();
        signed.append(&payload);
        let wire = signed.encode(true, 0, id);
        group.bench_function(format!("decode_verify_{size}b"), |b| {
            b.iter(|| {
                let mut decoded = IncomingPacket::decode(wire.clone()).unwrap();
                decoded.verify_mac(Some(key.as_ref())).unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode);
criterion_main!(benches);
