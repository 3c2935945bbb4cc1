use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use safe_datagram::config::ReassemblyConfig;
use safe_datagram::core::header::MessageId;
use safe_datagram::core::packet::IncomingPacket;
use safe_datagram::protocol::{IncomingMessage, OutgoingMessage};
use safe_datagram::transport::LoopbackTransport;
use std::net::SocketAddr;

#[allow(clippy::unwrap_used)]
fn bench_message_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_fragmentation");
    let destination = SocketAddr::from(([127, 0, 0, 1], 9618));
    let id = MessageId::new(0x7f00_0001, 1, 1_700_000_000, 1);
    let config = ReassemblyConfig::default();

    for &size in &[4096usize, 65_536, 1024 * 1024] {
        let data = vec![0x61u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("fragment_{size}b"), |b| {
            let mut outgoing = OutgoingMessage::new();
            let mut transport = LoopbackTransport::new();
            b.iter(|| {
                outgoing.append(&data).unwrap();
                outgoing.send(&mut transport, destination, id).unwrap();
                transport.take_datagrams()
            })
        });

        let mut outgoing = OutgoingMessage::new();
        let mut transport = LoopbackTransport::new();
        outgoing.append(&data).unwrap();
        outgoing.send(&mut transport, destination, id).unwrap();
        let datagrams = transport.take_datagrams();

        group.bench_function(format!("reassemble_{size}b"), |b| {
            b.iter_batched(
                || datagrams.clone(),
                |datagrams| {
                    let mut message = IncomingMessage::new(id, &config).unwrap();
                    for datagram in datagrams.into_iter().rev() {
                        message
                            .add_packet(IncomingPacket::decode(datagram).unwrap())
                            .unwrap();
                    }
                    message.read(size).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_message_roundtrip);
criterion_main!(benches);
