//! Peer addresses and the static peer set

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Peer address parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerAddrError {
    #[error("Missing port in peer address: {0}")]
    MissingPort(String),
    #[error("Invalid port in peer address: {0}")]
    InvalidPort(String),
    #[error("Empty host in peer address: {0}")]
    EmptyHost(String),
}

/// `host:port` address of a node, compared as written
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerAddr {
    type Err = PeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PeerAddrError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(PeerAddrError::EmptyHost(s.to_string()));
        }
        port.parse::<u16>()
            .map_err(|_| PeerAddrError::InvalidPort(s.to_string()))?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = PeerAddrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed membership for the lifetime of the process.
///
/// The configured list may include this node's own address; callers skip it
/// when talking to peers.
#[derive(Clone, Debug)]
pub struct PeerSet {
    local: PeerAddr,
    peers: Vec<PeerAddr>,
}

impl PeerSet {
    /// Create a peer set, dropping duplicate addresses
    pub fn new(local: PeerAddr, peers: impl IntoIterator<Item = PeerAddr>) -> Self {
        let mut unique: Vec<PeerAddr> = Vec::new();
        for peer in peers {
            if !unique.contains(&peer) {
                unique.push(peer);
            }
        }
        Self {
            local,
            peers: unique,
        }
    }

    /// This node's own address
    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    /// Configured addresses other than our own
    pub fn remotes(&self) -> impl Iterator<Item = &PeerAddr> + '_ {
        self.peers.iter().filter(move |peer| **peer != self.local)
    }

    pub fn is_local(&self, addr: &str) -> bool {
        self.local.as_str() == addr
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Pick `min(len, count)` distinct addresses at random
    pub fn select_random<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<PeerAddr> {
        if self.peers.len() <= count {
            return self.peers.clone();
        }
        self.peers.choose_multiple(rng, count).cloned().collect()
    }
}
