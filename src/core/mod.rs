//! # Core Protocol Components
//!
//! Per-datagram codec: fixed header, security metadata and payload.
//!
//! ## Components
//! - **Header**: fixed long-format header and message identity
//! - **Mac**: keyed MAC provider abstraction
//! - **Packet**: outgoing packet builder and decoded incoming packet
//!
//! ## Wire Format
//! ```text
//! [Magic(8)] [Last(1)] [Seq(2)] [BodyLen(2)] [MessageId(12)] [Flags(2)] [MacIdLen(2)] [EncIdLen(2)]
//! [MacKeyId] [Mac(16)] [EncKeyId] [Payload]
//! ```
//!
//! ## Security
//! - Declared body length must match the datagram exactly
//! - Security extras are bounds-checked before any slice is taken
//! - Authenticated payload is never released before its MAC is verified

pub mod header;
pub mod mac;
pub mod packet;
