//! Configuration for kvgossipd

use clap::{Parser, ValueEnum};
use kvgossip_net::peer::{PeerAddr, PeerAddrError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// kvgossipd - replicated in-memory record store node
#[derive(Parser, Debug, Clone)]
#[command(name = "kvgossipd")]
#[command(about = "Eventually consistent in-memory record store with gossip anti-entropy")]
pub struct Config {
    /// Listen address for client and peer HTTP traffic
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "KVGOSSIP_LISTEN")]
    pub listen: SocketAddr,

    /// This node's address as it appears in peer lists (defaults to localhost:<port>)
    #[arg(long, env = "KVGOSSIP_ADVERTISE")]
    pub advertise: Option<String>,

    /// Static peer addresses (comma-separated host:port, may include this node)
    #[arg(long, value_delimiter = ',', env = "KVGOSSIP_PEERS")]
    pub peers: Vec<String>,

    /// Periodic gossip round interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub gossip_interval_ms: u64,

    /// Peers contacted per gossip round
    #[arg(long, default_value = "3")]
    pub fanout: usize,

    /// Lifetime of an inserted record in seconds
    #[arg(long, default_value = "300")]
    pub expiration_secs: u64,

    /// Timeout for a single peer HTTP call in milliseconds
    #[arg(long, default_value = "5000")]
    pub peer_timeout_ms: u64,

    /// sled database of records to load at startup
    #[arg(long)]
    pub seed_db: Option<PathBuf>,

    /// Fixed seed for skip list levels and peer sampling
    #[arg(long)]
    pub rng_seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fanout == 0 {
            anyhow::bail!("Fanout must be at least 1");
        }
        if self.gossip_interval_ms == 0 {
            anyhow::bail!("Gossip interval cannot be zero");
        }
        if self.peer_timeout_ms == 0 {
            anyhow::bail!("Peer timeout cannot be zero");
        }
        self.local_addr()?;
        self.peer_addrs()?;
        Ok(())
    }

    /// Address other nodes use for us
    pub fn local_addr(&self) -> Result<PeerAddr, PeerAddrError> {
        match &self.advertise {
            Some(addr) => addr.parse(),
            None => format!("localhost:{}", self.listen.port()).parse(),
        }
    }

    /// Parsed static peer list
    pub fn peer_addrs(&self) -> Result<Vec<PeerAddr>, PeerAddrError> {
        self.peers
            .iter()
            .filter(|peer| !peer.trim().is_empty())
            .map(|peer| peer.parse())
            .collect()
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}
