//! # safe-datagram
//!
//! Carries messages of arbitrary size over UDP: splits them into datagrams,
//! reassembles them on the far side regardless of ordering and duplication,
//! and optionally authenticates every datagram with a keyed MAC.
//!
//! ## Layers
//! - [`core`]: one datagram (header, security metadata, payload)
//! - [`protocol`]: outgoing assembly and incoming reassembly of whole messages
//! - [`transport`]: the datagram send primitive and UDP glue
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```rust
//! use safe_datagram::core::header::MessageId;
//! use safe_datagram::core::mac::HmacSha256Mac;
//! use safe_datagram::core::packet::IncomingPacket;
//! use safe_datagram::config::ReassemblyConfig;
//! use safe_datagram::protocol::{IncomingMessage, OutgoingMessage};
//! use safe_datagram::transport::LoopbackTransport;
//! use std::net::SocketAddr;
//!
//! # fn main() -> safe_datagram::error::Result<()> {
//! let key = HmacSha256Mac::shared(b"pool password")?;
//! let id = MessageId::new(0x7f00_0001, 100, 1_700_000_000, 1);
//! let to = SocketAddr::from(([127, 0, 0, 1], 9618));
//!
//! let mut outgoing = OutgoingMessage::new();
//! outgoing.enable_authentication(key.clone(), "pool")?;
//! outgoing.append(&vec![b'x'; 5_000])?;
//! outgoing.append(b"\n")?;
//!
//! let mut wire = LoopbackTransport::new();
//! outgoing.send(&mut wire, to, id)?;
//!
//! let mut incoming = IncomingMessage::new(id, &ReassemblyConfig::default())?;
//! for datagram in wire.take_datagrams().into_iter().rev() {
//!     incoming.add_packet(IncomingPacket::decode(datagram)?)?;
//! }
//! assert_eq!(incoming.mac_key_id(), Some("pool"));
//! incoming.set_mac_verifier(key);
//!
//! let line = incoming.read_until(b'\n')?;
//! assert_eq!(line.len(), 5_001);
//! assert!(incoming.is_fully_consumed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
