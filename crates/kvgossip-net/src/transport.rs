//! HTTP transport for the peer protocol
//!
//! Three request/response calls make up the whole protocol: a digest push,
//! a batched record pull, and the expiration delete instruction.

use crate::peer::PeerAddr;
use async_trait::async_trait;
use kvgossip_core::types::{PullRequest, PullResponse, RecordId, SyncMessage};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Digest push endpoint
pub const SYNC_DIGEST_PATH: &str = "/SyncDigest";
/// Record pull endpoint
pub const REQUEST_DATA_PATH: &str = "/RequestData";
/// Expiration delete endpoint
pub const EXPIRATION_DELETE_PATH: &str = "/ExpirationDelete";

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {peer} failed: {source}")]
    Http {
        peer: PeerAddr,
        #[source]
        source: reqwest::Error,
    },
    #[error("Peer {peer} answered with status {status}")]
    Status { peer: PeerAddr, status: u16 },
}

/// Calls a node makes on its peers.
///
/// The gossip engine and the expiration service only talk to peers through
/// this trait, so tests can swap the network for an in-process loopback.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Push a digest; success means the peer finished processing it
    async fn send_digest(&self, peer: &PeerAddr, message: &SyncMessage)
        -> Result<(), TransportError>;

    /// Fetch full records by ID
    async fn request_data(
        &self,
        peer: &PeerAddr,
        request: &PullRequest,
    ) -> Result<PullResponse, TransportError>;

    /// Tell a peer to drop an expired record
    async fn expiration_delete(&self, peer: &PeerAddr, id: RecordId) -> Result<(), TransportError>;
}

/// [`PeerClient`] over plain HTTP/JSON
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose calls give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }

    fn url(peer: &PeerAddr, path: &str) -> String {
        format!("http://{peer}{path}")
    }

    fn check_status(peer: &PeerAddr, response: &reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                peer: peer.clone(),
                status: status.as_u16(),
            })
        }
    }

    fn http_error(peer: &PeerAddr) -> impl FnOnce(reqwest::Error) -> TransportError + '_ {
        move |source| TransportError::Http {
            peer: peer.clone(),
            source,
        }
    }
}

#[async_trait]
impl PeerClient for HttpTransport {
    async fn send_digest(
        &self,
        peer: &PeerAddr,
        message: &SyncMessage,
    ) -> Result<(), TransportError> {
        debug!(%peer, entries = message.digest.len(), "Sending digest");
        let response = self
            .client
            .post(Self::url(peer, SYNC_DIGEST_PATH))
            .json(message)
            .send()
            .await
            .map_err(Self::http_error(peer))?;
        Self::check_status(peer, &response)
    }

    async fn request_data(
        &self,
        peer: &PeerAddr,
        request: &PullRequest,
    ) -> Result<PullResponse, TransportError> {
        debug!(%peer, ids = request.ids.len(), "Requesting records");
        let response = self
            .client
            .post(Self::url(peer, REQUEST_DATA_PATH))
            .json(request)
            .send()
            .await
            .map_err(Self::http_error(peer))?;
        Self::check_status(peer, &response)?;
        response
            .json::<PullResponse>()
            .await
            .map_err(Self::http_error(peer))
    }

    async fn expiration_delete(&self, peer: &PeerAddr, id: RecordId) -> Result<(), TransportError> {
        debug!(%peer, id, "Sending expiration delete");
        let response = self
            .client
            .get(Self::url(peer, EXPIRATION_DELETE_PATH))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(Self::http_error(peer))?;
        Self::check_status(peer, &response)
    }
}
