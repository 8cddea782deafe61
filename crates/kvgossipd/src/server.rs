//! kvgossipd server - node lifecycle and HTTP listener

use crate::config::Config;
use crate::expiration::{self, ExpirationReport};
use crate::handlers;
use crate::node::{Node, NodeSettings, NodeStats};
use crate::storage::{SeedStore, StorageError};
use kvgossip_net::peer::{PeerAddrError, PeerSet};
use kvgossip_net::transport::{HttpTransport, PeerClient, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Config error: {0}")]
    Config(#[from] PeerAddrError),
}

/// Server state
pub struct Server {
    config: Config,
    node: Arc<Node>,
    /// Expiration reports, taken by the supervisor when serving starts
    reports: Mutex<Option<mpsc::UnboundedReceiver<ExpirationReport>>>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let peers = PeerSet::new(config.local_addr()?, config.peer_addrs()?);
        let client: Arc<dyn PeerClient> = Arc::new(HttpTransport::new(config.peer_timeout())?);
        let (node, reports) = Node::new(peers, client, &NodeSettings::from_config(&config));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            node: Arc::new(node),
            reports: Mutex::new(Some(reports)),
            shutdown_tx,
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// Seed records are loaded before the first request is handled.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let loaded = self.bootstrap()?;
        info!(
            "Starting kvgossipd as {} on {} ({} seed records, {} peers)",
            self.node.peers().local(),
            listener.local_addr()?,
            loaded,
            self.node.peers().len()
        );

        let gossip = tokio::spawn(self.node.gossip().clone().run(self.shutdown_tx.subscribe()));
        let supervisor = self
            .reports
            .lock()
            .take()
            .map(|reports| tokio::spawn(expiration::supervise(reports)));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let result = axum::serve(listener, handlers::router(self.node.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutting down...");
            })
            .await;

        // the loop only stops on the signal, so make sure it was sent
        self.shutdown();
        if let Err(e) = gossip.await {
            warn!("Gossip task failed: {}", e);
        }
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        result?;
        Ok(())
    }

    /// Load the seed store, if one is configured
    fn bootstrap(&self) -> Result<usize, ServerError> {
        let Some(path) = &self.config.seed_db else {
            return Ok(0);
        };
        let store = SeedStore::open(path)?;
        let records = store.all_records().filter_map(|result| match result {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable seed record: {}", e);
                None
            }
        });
        let loaded = self.node.bootstrap(records);
        info!("Loaded {} records from {}", loaded, path.display());
        Ok(loaded)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get server statistics
    pub fn stats(&self) -> NodeStats {
        self.node.stats()
    }
}
