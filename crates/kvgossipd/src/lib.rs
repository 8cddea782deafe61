//! kvgossipd - replicated in-memory record store node
//!
//! This daemon provides:
//! - A client record API over HTTP
//! - Gossip digest exchange and pull-based reconciliation with peers
//! - Time-based expiration propagated to every peer
//! - Bootstrap from a sled seed store

pub mod config;
pub mod expiration;
pub mod gossip;
pub mod handlers;
pub mod node;
pub mod server;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use gossip::GossipEngine;
pub use node::Node;
pub use server::Server;
pub use storage::SeedStore;
