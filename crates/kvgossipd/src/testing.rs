//! In-process peer clients for tests

use crate::gossip::GossipEngine;
use async_trait::async_trait;
use kvgossip_core::types::{PullRequest, PullResponse, RecordId, SyncMessage};
use kvgossip_net::peer::PeerAddr;
use kvgossip_net::transport::{PeerClient, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub(crate) fn addr(s: &str) -> PeerAddr {
    s.parse().unwrap()
}

fn unavailable(peer: &PeerAddr) -> TransportError {
    TransportError::Status {
        peer: peer.clone(),
        status: 503,
    }
}

/// Routes peer calls straight into registered engines
#[derive(Default)]
pub(crate) struct LoopbackNetwork {
    engines: RwLock<HashMap<PeerAddr, Arc<GossipEngine>>>,
}

impl LoopbackNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(&self, engine: &Arc<GossipEngine>) {
        self.engines
            .write()
            .insert(engine.local().clone(), engine.clone());
    }

    fn engine(&self, peer: &PeerAddr) -> Result<Arc<GossipEngine>, TransportError> {
        self.engines
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| unavailable(peer))
    }
}

#[async_trait]
impl PeerClient for LoopbackNetwork {
    async fn send_digest(
        &self,
        peer: &PeerAddr,
        message: &SyncMessage,
    ) -> Result<(), TransportError> {
        let engine = self.engine(peer)?;
        // a receiver-side pull failure is the receiver's problem, like over HTTP
        let _ = engine.receive_digest(message.clone()).await;
        Ok(())
    }

    async fn request_data(
        &self,
        peer: &PeerAddr,
        request: &PullRequest,
    ) -> Result<PullResponse, TransportError> {
        Ok(self.engine(peer)?.requested_data(&request.ids))
    }

    async fn expiration_delete(&self, peer: &PeerAddr, id: RecordId) -> Result<(), TransportError> {
        self.engine(peer)?.index().delete(id);
        Ok(())
    }
}

/// Records every call and answers with empty successes
#[derive(Default)]
pub(crate) struct RecordingClient {
    failing: HashSet<PeerAddr>,
    digests: Mutex<Vec<(PeerAddr, SyncMessage)>>,
    pulls: Mutex<Vec<(PeerAddr, Vec<RecordId>)>>,
    deletes: Mutex<Vec<(PeerAddr, RecordId)>>,
}

impl RecordingClient {
    /// Client whose calls to `peers` fail
    pub(crate) fn failing_for(peers: &[&str]) -> Self {
        Self {
            failing: peers.iter().map(|p| addr(p)).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn digests(&self) -> Vec<(PeerAddr, SyncMessage)> {
        self.digests.lock().clone()
    }

    pub(crate) fn pulls(&self) -> Vec<(PeerAddr, Vec<RecordId>)> {
        self.pulls.lock().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<(PeerAddr, RecordId)> {
        self.deletes.lock().clone()
    }

    fn check(&self, peer: &PeerAddr) -> Result<(), TransportError> {
        if self.failing.contains(peer) {
            Err(unavailable(peer))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerClient for RecordingClient {
    async fn send_digest(
        &self,
        peer: &PeerAddr,
        message: &SyncMessage,
    ) -> Result<(), TransportError> {
        self.check(peer)?;
        self.digests.lock().push((peer.clone(), message.clone()));
        Ok(())
    }

    async fn request_data(
        &self,
        peer: &PeerAddr,
        request: &PullRequest,
    ) -> Result<PullResponse, TransportError> {
        self.check(peer)?;
        self.pulls.lock().push((peer.clone(), request.ids.clone()));
        Ok(Vec::new())
    }

    async fn expiration_delete(&self, peer: &PeerAddr, id: RecordId) -> Result<(), TransportError> {
        self.deletes.lock().push((peer.clone(), id));
        self.check(peer)
    }
}
