#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use safe_datagram::core::packet::IncomingPacket;

fuzz_target!(|data: &[u8]| {
    // Datagram decoding must reject garbage without panicking
    if let Ok(mut packet) = IncomingPacket::decode(Bytes::copy_from_slice(data)) {
        let _ = packet.verify_mac(None);
        let _ = packet.read_until(b'\n');
    }
});
