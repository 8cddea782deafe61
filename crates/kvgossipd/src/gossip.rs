//! Gossip anti-entropy: digest push, record pull, last-write-wins merge
//!
//! A round picks up to `fanout` peers at random and pushes each of them a
//! fresh digest of the local index. A receiver compares the digest with its
//! own, pulls every record it is missing or holds an older version of, and
//! merges the results. Rounds run on a timer and whenever a local write
//! calls [`GossipEngine::trigger_sync`].

use kvgossip_core::types::{stale_ids, Digest, PullRequest, Record, RecordId, SyncMessage};
use kvgossip_core::{SkipList, VersionClock};
use kvgossip_net::peer::{PeerAddr, PeerAddrError, PeerSet};
use kvgossip_net::transport::{PeerClient, TransportError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sync protocol errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sender address: {0}")]
    InvalidSender(#[from] PeerAddrError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of one sync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Peers that accepted our digest
    pub delivered: Vec<PeerAddr>,
    /// Peers whose send failed
    pub failed: Vec<PeerAddr>,
}

/// Gossip statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GossipStats {
    pub rounds: u64,
    pub digests_sent: u64,
    pub send_failures: u64,
    pub records_merged: u64,
}

#[derive(Debug, Default)]
struct Counters {
    rounds: AtomicU64,
    digests_sent: AtomicU64,
    send_failures: AtomicU64,
    records_merged: AtomicU64,
}

/// Gossip engine shared by the sync loop and the peer endpoints
pub struct GossipEngine {
    index: Arc<SkipList>,
    clock: Arc<VersionClock>,
    peers: Arc<PeerSet>,
    client: Arc<dyn PeerClient>,
    /// Peers contacted per round
    fanout: usize,
    /// Periodic round interval
    interval: Duration,
    /// Peer sampling source
    rng: Mutex<StdRng>,
    /// Pending explicit trigger (holds at most one permit)
    trigger: Notify,
    counters: Counters,
}

impl GossipEngine {
    pub fn new(
        index: Arc<SkipList>,
        clock: Arc<VersionClock>,
        peers: Arc<PeerSet>,
        client: Arc<dyn PeerClient>,
        fanout: usize,
        interval: Duration,
    ) -> Self {
        Self {
            index,
            clock,
            peers,
            client,
            fanout: fanout.max(1),
            interval,
            rng: Mutex::new(StdRng::from_entropy()),
            trigger: Notify::new(),
            counters: Counters::default(),
        }
    }

    /// Use a fixed seed for peer sampling
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// This node's advertised address
    pub fn local(&self) -> &PeerAddr {
        self.peers.local()
    }

    pub fn index(&self) -> &Arc<SkipList> {
        &self.index
    }

    /// Request a round as soon as possible.
    ///
    /// Never blocks; triggers posted while one is pending collapse into it.
    pub fn trigger_sync(&self) {
        self.trigger.notify_one();
    }

    /// Run rounds on the timer and on triggers until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Gossip started: {} peers, fanout {}, interval {:?}",
            self.peers.len(),
            self.fanout,
            self.interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sync_round().await;
                }
                _ = self.trigger.notified() => {
                    debug!("Triggered sync round");
                    self.sync_round().await;
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
        info!("Gossip stopped");
    }

    /// Pick `min(peer count, count)` distinct peers
    pub fn select_random_nodes(&self, count: usize) -> Vec<PeerAddr> {
        let mut rng = self.rng.lock();
        self.peers.select_random(count, &mut *rng)
    }

    /// Version snapshot of the whole local index
    pub fn prepare_digest(&self) -> Digest {
        self.index.digest()
    }

    /// Push our digest to a random sample of peers and wait for every send
    pub async fn sync_round(self: &Arc<Self>) -> RoundReport {
        let targets = self.select_random_nodes(self.fanout);
        let mut sends = JoinSet::new();

        for peer in targets {
            if peer == *self.peers.local() {
                continue;
            }
            let engine = Arc::clone(self);
            sends.spawn(async move {
                let message =
                    SyncMessage::new(engine.peers.local().as_str(), engine.prepare_digest());
                let result = engine.client.send_digest(&peer, &message).await;
                (peer, result)
            });
        }

        let mut report = RoundReport::default();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    debug!(%peer, "Digest delivered");
                    report.delivered.push(peer);
                }
                Ok((peer, Err(e))) => {
                    warn!(%peer, "Failed to send digest: {}", e);
                    report.failed.push(peer);
                }
                Err(e) => {
                    warn!("Digest send task failed: {}", e);
                }
            }
        }

        self.counters.rounds.fetch_add(1, Ordering::Relaxed);
        self.counters
            .digests_sent
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        self.counters
            .send_failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        report
    }

    /// Handle a peer's digest: pull whatever it has newer than us.
    ///
    /// Returns the number of records merged.
    pub async fn receive_digest(&self, message: SyncMessage) -> Result<usize, SyncError> {
        if self.peers.is_local(&message.node_addr) {
            debug!("Ignoring our own digest");
            return Ok(0);
        }
        let sender: PeerAddr = message.node_addr.parse()?;

        let needed = stale_ids(&self.prepare_digest(), &message.digest);
        if needed.is_empty() {
            return Ok(0);
        }

        debug!(%sender, round = message.round, "Pulling {} records", needed.len());
        let records = self
            .client
            .request_data(&sender, &PullRequest { ids: needed })
            .await?;
        Ok(self.apply_pull_response(records))
    }

    /// Merge pulled records with last-write-wins
    pub fn apply_pull_response(&self, records: Vec<Record>) -> usize {
        let mut merged = 0;
        for record in records {
            let version = record.version;
            if self.index.merge(record) {
                self.clock.observe(version);
                merged += 1;
            }
        }
        self.counters
            .records_merged
            .fetch_add(merged as u64, Ordering::Relaxed);
        merged
    }

    /// Serve a pull: copies of the requested records we have
    pub fn requested_data(&self, ids: &[RecordId]) -> Vec<Record> {
        self.index.get_many(ids)
    }

    /// Get gossip statistics
    pub fn stats(&self) -> GossipStats {
        GossipStats {
            rounds: self.counters.rounds.load(Ordering::Relaxed),
            digests_sent: self.counters.digests_sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            records_merged: self.counters.records_merged.load(Ordering::Relaxed),
        }
    }
}
