//! Node context: the index, clock, gossip engine and expiration service of
//! one process, shared by the HTTP handlers and background tasks.

use crate::config::Config;
use crate::expiration::{ExpirationReport, ExpirationService};
use crate::gossip::{GossipEngine, GossipStats};
use kvgossip_core::types::{Record, RecordId, Version};
use kvgossip_core::{SkipList, VersionClock};
use kvgossip_net::peer::PeerSet;
use kvgossip_net::transport::PeerClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Client-facing record errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Record {0} already exists")]
    AlreadyExists(RecordId),
    #[error("Record {0} not found")]
    NotFound(RecordId),
}

/// Tunables for a node
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub fanout: usize,
    pub gossip_interval: Duration,
    pub expiration: Duration,
    pub rng_seed: Option<u64>,
}

impl NodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fanout: config.fanout,
            gossip_interval: config.gossip_interval(),
            expiration: config.expiration(),
            rng_seed: config.rng_seed,
        }
    }
}

/// Node statistics
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node: String,
    pub records: usize,
    pub tombstones: usize,
    pub peers: usize,
    pub index_level: usize,
    pub gossip: GossipStats,
}

pub struct Node {
    index: Arc<SkipList>,
    clock: Arc<VersionClock>,
    peers: Arc<PeerSet>,
    gossip: Arc<GossipEngine>,
    expiration: Arc<ExpirationService>,
}

impl Node {
    /// Create a node and the receiver for its expiration reports
    pub fn new(
        peers: PeerSet,
        client: Arc<dyn PeerClient>,
        settings: &NodeSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ExpirationReport>) {
        let index = Arc::new(match settings.rng_seed {
            Some(seed) => SkipList::seeded(seed),
            None => SkipList::new(),
        });
        let clock = Arc::new(VersionClock::new());
        let peers = Arc::new(peers);

        let mut gossip = GossipEngine::new(
            index.clone(),
            clock.clone(),
            peers.clone(),
            client.clone(),
            settings.fanout,
            settings.gossip_interval,
        );
        if let Some(seed) = settings.rng_seed {
            gossip = gossip.with_rng_seed(seed);
        }

        let (expiration, reports) = ExpirationService::new(
            index.clone(),
            clock.clone(),
            peers.clone(),
            client,
            settings.expiration,
        );

        (
            Self {
                index,
                clock,
                peers,
                gossip: Arc::new(gossip),
                expiration: Arc::new(expiration),
            },
            reports,
        )
    }

    pub fn index(&self) -> &Arc<SkipList> {
        &self.index
    }

    pub fn gossip(&self) -> &Arc<GossipEngine> {
        &self.gossip
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Create a record.
    ///
    /// Fails if a live record with the same ID exists; a tombstone is
    /// replaced. The stored copy is returned.
    pub fn insert(&self, mut record: Record) -> Result<Record, NodeError> {
        record.version = self.clock.next();
        record.deleted = false;
        if !self.index.insert_vacant(record.clone()) {
            return Err(NodeError::AlreadyExists(record.id));
        }
        debug!(id = record.id, version = %record.version, "Record inserted");
        self.expiration.schedule_delete(record.id);
        self.gossip.trigger_sync();
        Ok(record)
    }

    /// Replace a record, creating it if absent
    pub fn update(&self, mut record: Record) -> Record {
        record.version = self.clock.next();
        record.deleted = false;
        self.index.update(record.clone());
        debug!(id = record.id, version = %record.version, "Record updated");
        self.gossip.trigger_sync();
        record
    }

    /// Tombstone a record with a new version
    pub fn delete(&self, id: RecordId) -> Result<Record, NodeError> {
        let record = self
            .index
            .tombstone(id, self.clock.next())
            .ok_or(NodeError::NotFound(id))?;
        debug!(id, version = %record.version, "Record tombstoned");
        self.gossip.trigger_sync();
        Ok(record)
    }

    /// Live record by ID; tombstones read as absent
    pub fn get(&self, id: RecordId) -> Result<Record, NodeError> {
        self.index
            .search(id)
            .filter(|record| !record.is_tombstone())
            .ok_or(NodeError::NotFound(id))
    }

    /// Apply a peer's expiration instruction.
    ///
    /// Physically removes the record; missing IDs are fine.
    pub fn expire_remote(&self, id: RecordId) -> bool {
        let removed = self.index.delete(id).is_some();
        debug!(id, removed, "Remote expiration applied");
        removed
    }

    /// Load seed records and schedule their expiration.
    ///
    /// Stored versions are kept; unversioned records get a fresh one.
    pub fn bootstrap(&self, records: impl IntoIterator<Item = Record>) -> usize {
        let mut loaded = 0;
        for mut record in records {
            if record.version == Version::ZERO {
                record.version = self.clock.next();
            } else {
                self.clock.observe(record.version);
            }
            let id = record.id;
            self.index.update(record);
            self.expiration.schedule_delete(id);
            loaded += 1;
        }
        loaded
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            node: self.peers.local().to_string(),
            records: self.index.len(),
            tombstones: self.index.tombstone_count(),
            peers: self.peers.len(),
            index_level: self.index.level(),
            gossip: self.gossip.stats(),
        }
    }
}
