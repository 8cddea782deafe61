//! Networking primitives for the kvgossip peer protocol
//!
//! This crate provides:
//! - Validated `host:port` peer addresses and the static peer set
//! - Random fan-out selection over the peer set
//! - The [`PeerClient`] seam and its HTTP/JSON implementation

pub mod peer;
pub mod transport;

pub use peer::{PeerAddr, PeerAddrError, PeerSet};
pub use transport::{HttpTransport, PeerClient, TransportError};
