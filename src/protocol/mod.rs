//! # Message Layer
//!
//! Fragmentation of outgoing messages and reassembly of incoming ones.
//!
//! ## Components
//! - **Outgoing**: splits a byte stream into packets and sends them
//! - **Incoming**: collects packets in any order and serves reads once complete
//! - **Directory**: fixed pages of packet slots backing the reassembler
//!
//! One [`OutgoingMessage`] models one outbound message at a time and is reused
//! after each send. One [`IncomingMessage`] exists per in-flight message id;
//! the table that owns them and evicts stale ones lives above this layer.

pub mod directory;
pub mod incoming;
pub mod outgoing;

pub use directory::{DirectoryPage, Fragment, Slot};
pub use incoming::{AddOutcome, IncomingMessage, MessageState};
pub use outgoing::OutgoingMessage;
