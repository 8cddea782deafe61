//! Time-based record expiration
//!
//! Every inserted record gets one delayed delete. When it fires the record is
//! tombstoned locally and every other peer is told to drop it directly, since
//! a digest would still advertise the old version until the next exchange.

use kvgossip_core::types::RecordId;
use kvgossip_core::{SkipList, VersionClock};
use kvgossip_net::peer::{PeerAddr, PeerSet};
use kvgossip_net::transport::PeerClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one fired expiration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationReport {
    pub id: RecordId,
    /// Whether the record was still present locally
    pub expired_locally: bool,
    /// Peers that acknowledged the delete
    pub notified: Vec<PeerAddr>,
    /// Peers the delete could not reach, with the reason
    pub failed: Vec<(PeerAddr, String)>,
}

/// Schedules delayed deletes and fans them out to peers
pub struct ExpirationService {
    index: Arc<SkipList>,
    clock: Arc<VersionClock>,
    peers: Arc<PeerSet>,
    client: Arc<dyn PeerClient>,
    /// Record lifetime
    ttl: Duration,
    reports: mpsc::UnboundedSender<ExpirationReport>,
}

impl ExpirationService {
    /// Create the service and the channel its reports arrive on
    pub fn new(
        index: Arc<SkipList>,
        clock: Arc<VersionClock>,
        peers: Arc<PeerSet>,
        client: Arc<dyn PeerClient>,
        ttl: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ExpirationReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        (
            Self {
                index,
                clock,
                peers,
                client,
                ttl,
                reports,
            },
            rx,
        )
    }

    /// Expire `id` after the configured lifetime.
    ///
    /// The delay runs on its own task and holds no lock while waiting.
    pub fn schedule_delete(self: &Arc<Self>, id: RecordId) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(service.ttl).await;
            let report = service.expire(id).await;
            // nobody listening is fine; the report was already logged
            let _ = service.reports.send(report);
        })
    }

    /// Expire `id` now: tombstone it locally, then notify every other peer.
    ///
    /// A failed peer does not stop the remaining notifications.
    pub async fn expire(&self, id: RecordId) -> ExpirationReport {
        let expired_locally = self.index.tombstone(id, self.clock.next()).is_some();
        let mut report = ExpirationReport {
            id,
            expired_locally,
            notified: Vec::new(),
            failed: Vec::new(),
        };

        for peer in self.peers.remotes() {
            match self.client.expiration_delete(peer, id).await {
                Ok(()) => report.notified.push(peer.clone()),
                Err(e) => {
                    warn!(%peer, id, "Failed to propagate expiration: {}", e);
                    report.failed.push((peer.clone(), e.to_string()));
                }
            }
        }

        debug!(
            id,
            notified = report.notified.len(),
            failed = report.failed.len(),
            "Record expired"
        );
        report
    }
}

/// Drain expiration reports until every sender is gone
pub async fn supervise(mut reports: mpsc::UnboundedReceiver<ExpirationReport>) {
    while let Some(report) = reports.recv().await {
        if !report.failed.is_empty() {
            let peers: Vec<String> = report.failed.iter().map(|(p, _)| p.to_string()).collect();
            warn!(
                "Expiration of {} reached {} peers, missed {}",
                report.id,
                report.notified.len(),
                peers.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, RecordingClient};
    use kvgossip_core::types::{Record, Version};

    fn service(
        client: Arc<RecordingClient>,
        ttl: Duration,
    ) -> (Arc<ExpirationService>, mpsc::UnboundedReceiver<ExpirationReport>) {
        let peers = PeerSet::new(
            addr("a:1"),
            vec![addr("a:1"), addr("b:2"), addr("c:3")],
        );
        let (service, rx) = ExpirationService::new(
            Arc::new(SkipList::seeded(3)),
            Arc::new(VersionClock::new()),
            Arc::new(peers),
            client,
            ttl,
        );
        (Arc::new(service), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_propagates_to_every_other_peer() {
        let client = Arc::new(RecordingClient::default());
        let (service, mut rx) = service(client.clone(), Duration::from_secs(30));
        service
            .index
            .insert(Record::new(5, "n", "g", "c").with_version(Version(100)));

        let started = tokio::time::Instant::now();
        service.schedule_delete(5);
        let report = rx.recv().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(report.expired_locally);
        assert_eq!(report.notified, vec![addr("b:2"), addr("c:3")]);
        assert_eq!(client.deletes(), vec![(addr("b:2"), 5), (addr("c:3"), 5)]);

        let local = service.index.search(5).unwrap();
        assert!(local.deleted);
        assert!(local.version.is_newer_than(Version(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_fired_before_ttl() {
        let client = Arc::new(RecordingClient::default());
        let (service, _rx) = service(client.clone(), Duration::from_secs(30));
        service.index.insert(Record::new(5, "n", "g", "c"));

        service.schedule_delete(5);
        tokio::time::sleep(Duration::from_secs(29)).await;

        assert!(!service.index.search(5).unwrap().deleted);
        assert!(client.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_stop_propagation() {
        let client = Arc::new(RecordingClient::failing_for(&["b:2"]));
        let (service, _rx) = service(client.clone(), Duration::ZERO);

        let report = service.expire(8).await;
        assert!(!report.expired_locally);
        assert_eq!(report.notified, vec![addr("c:3")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, addr("b:2"));
        assert_eq!(client.deletes().len(), 2);
    }
}
