//! Multi-node tests over real HTTP.
//!
//! Each node is a full [`Server`] on an ephemeral loopback port, with a short
//! gossip interval so replication settles within a few seconds.

use clap::Parser;
use kvgossip_core::types::Record;
use kvgossipd::config::Config;
use kvgossipd::server::{Server, ServerError};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Polling attempts before a wait gives up.
const ATTEMPTS: usize = 150;
const POLL: Duration = Duration::from_millis(100);

// =========================================================================
// Harness
// =========================================================================

struct TestCluster {
    servers: Vec<Arc<Server>>,
    bases: Vec<String>,
    handles: Vec<JoinHandle<Result<(), ServerError>>>,
    http: reqwest::Client,
}

impl TestCluster {
    async fn start(nodes: usize, expiration_secs: u64) -> Self {
        let mut listeners = Vec::new();
        for _ in 0..nodes {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let addrs: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect();
        let peers = addrs.join(",");

        let mut cluster = Self {
            servers: Vec::new(),
            bases: Vec::new(),
            handles: Vec::new(),
            http: reqwest::Client::new(),
        };

        for (i, listener) in listeners.into_iter().enumerate() {
            let expiration = expiration_secs.to_string();
            let seed = (i as u64 + 1).to_string();
            let config = Config::try_parse_from([
                "kvgossipd",
                "--listen",
                addrs[i].as_str(),
                "--advertise",
                addrs[i].as_str(),
                "--peers",
                peers.as_str(),
                "--gossip-interval-ms",
                "100",
                "--peer-timeout-ms",
                "1000",
                "--expiration-secs",
                expiration.as_str(),
                "--rng-seed",
                seed.as_str(),
            ])
            .unwrap();
            config.validate().unwrap();

            let server = Arc::new(Server::new(config).unwrap());
            let handle = {
                let server = server.clone();
                tokio::spawn(async move { server.serve(listener).await })
            };
            cluster.servers.push(server);
            cluster.bases.push(format!("http://{}", addrs[i]));
            cluster.handles.push(handle);
        }
        cluster
    }

    fn url(&self, node: usize, path: &str) -> String {
        format!("{}{}", self.bases[node], path)
    }

    async fn add(&self, node: usize, record: &Record) -> StatusCode {
        self.http
            .post(self.url(node, "/AddRecord"))
            .json(record)
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn update(&self, node: usize, record: &Record) -> StatusCode {
        self.http
            .post(self.url(node, "/UpdateRecord"))
            .json(record)
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn delete(&self, node: usize, id: i64) -> StatusCode {
        self.http
            .delete(self.url(node, &format!("/DeleteRecord?id={id}")))
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn query(&self, node: usize, id: i64) -> Option<Record> {
        let resp = self
            .http
            .get(self.url(node, &format!("/QueryRecord?id={id}")))
            .send()
            .await
            .unwrap();
        if resp.status() == StatusCode::NOT_FOUND {
            return None;
        }
        assert_eq!(resp.status(), StatusCode::OK);
        Some(resp.json().await.unwrap())
    }

    /// Poll `node` until `check` accepts its copy of `id`
    async fn wait_until(&self, node: usize, id: i64, check: impl Fn(Option<&Record>) -> bool) {
        for _ in 0..ATTEMPTS {
            if check(self.query(node, id).await.as_ref()) {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
        panic!("node {node} never reached the expected state for record {id}");
    }

    async fn stop(self) {
        for server in &self.servers {
            server.shutdown();
        }
        drop(self.http);
        for handle in self.handles {
            handle.await.unwrap().unwrap();
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_replicate_to_every_node() {
    let cluster = TestCluster::start(3, 300).await;

    let record = Record::new(42, "Ann", "F", "3B").with_score("math", 91);
    assert_eq!(cluster.add(0, &record).await, StatusCode::OK);
    for node in 1..3 {
        cluster
            .wait_until(node, 42, |r| r.map(|r| r.name == "Ann").unwrap_or(false))
            .await;
    }

    let renamed = Record::new(42, "Anna", "F", "3B").with_score("math", 93);
    assert_eq!(cluster.update(1, &renamed).await, StatusCode::OK);
    for node in [0, 2] {
        cluster
            .wait_until(node, 42, |r| {
                r.map(|r| r.name == "Anna" && r.scores.get("math") == Some(&93))
                    .unwrap_or(false)
            })
            .await;
    }

    assert_eq!(cluster.delete(2, 42).await, StatusCode::OK);
    for node in [0, 1] {
        cluster.wait_until(node, 42, |r| r.is_none()).await;
    }

    // a tombstone does not block re-insertion
    assert_eq!(cluster.add(0, &record).await, StatusCode::OK);
    cluster
        .wait_until(1, 42, |r| r.map(|r| r.name == "Ann").unwrap_or(false))
        .await;

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_on_different_nodes_converge() {
    let cluster = TestCluster::start(3, 300).await;

    for (node, id) in [(0, 1), (1, 2), (2, 3)] {
        let record = Record::new(id, format!("r{id}"), "M", "1A");
        assert_eq!(cluster.add(node, &record).await, StatusCode::OK);
    }
    for node in 0..3 {
        for id in 1..=3 {
            cluster.wait_until(node, id, |r| r.is_some()).await;
        }
    }

    let stats: Vec<_> = cluster.servers.iter().map(|s| s.stats()).collect();
    assert!(stats.iter().all(|s| s.records == 3));

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expiration_removes_record_everywhere() {
    let cluster = TestCluster::start(3, 1).await;

    let record = Record::new(9, "Tmp", "F", "2C");
    assert_eq!(cluster.add(0, &record).await, StatusCode::OK);
    for node in 1..3 {
        cluster.wait_until(node, 9, |r| r.is_some()).await;
    }
    for node in 0..3 {
        cluster.wait_until(node, 9, |r| r.is_none()).await;
    }

    // stays gone once gossip has had time to run again
    tokio::time::sleep(Duration::from_millis(500)).await;
    for node in 0..3 {
        assert!(cluster.query(node, 9).await.is_none());
    }

    cluster.stop().await;
}
