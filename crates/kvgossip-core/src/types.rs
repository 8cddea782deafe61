//! Core record and wire types for kvgossip
//!
//! All types here travel as JSON between peers and clients, so field names
//! are part of the protocol.

use crate::clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Record key.
pub type RecordId = i64;

// =============================================================================
// VERSIONS
// =============================================================================

/// Logical timestamp of a mutation (wall-clock nanoseconds at write time)
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version of a record that has never been written.
    pub const ZERO: Version = Version(0);

    /// Last-write-wins rule: strictly greater wins, ties keep the local copy
    pub fn is_newer_than(self, other: Version) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// A replicated record.
///
/// A tombstoned record (`deleted == true`) stays in the index so that its
/// version keeps suppressing older copies arriving from peers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub scores: BTreeMap<String, i64>,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    /// Create a live record with no version assigned yet
    pub fn new(
        id: RecordId,
        name: impl Into<String>,
        gender: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            gender: gender.into(),
            class: class.into(),
            ..Default::default()
        }
    }

    /// Builder-style score setter
    pub fn with_score(mut self, subject: impl Into<String>, score: i64) -> Self {
        self.scores.insert(subject.into(), score);
        self
    }

    /// Builder-style version setter
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Whether this record is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// Whether this copy should replace `local` under last-write-wins.
    ///
    /// Anything beats a missing local copy.
    pub fn supersedes(&self, local: Option<&Record>) -> bool {
        match local {
            None => true,
            Some(local) => self.version.is_newer_than(local.version),
        }
    }
}

// =============================================================================
// DIGEST & SYNC MESSAGES
// =============================================================================

/// Snapshot of the local index: record ID -> version
pub type Digest = BTreeMap<RecordId, Version>;

/// IDs in `remote` that are missing from `local` or newer than the local copy.
///
/// IDs only present in `local` are never reported; the exchange only pulls.
pub fn stale_ids(local: &Digest, remote: &Digest) -> Vec<RecordId> {
    remote
        .iter()
        .filter(|(id, remote_version)| match local.get(*id) {
            None => true,
            Some(local_version) => remote_version.is_newer_than(*local_version),
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Digest push sent to a peer at the start of an exchange
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMessage {
    /// Sender's advertised address; pulls go back here
    pub node_addr: String,
    /// Round identifier (nanosecond timestamp)
    pub round: u64,
    /// Wall-clock send time (unix milliseconds)
    pub timestamp: u64,
    pub digest: Digest,
}

impl SyncMessage {
    /// Stamp a digest for sending now
    pub fn new(node_addr: impl Into<String>, digest: Digest) -> Self {
        Self {
            node_addr: node_addr.into(),
            round: clock::unix_nanos(),
            timestamp: clock::unix_millis(),
            digest,
        }
    }
}

/// Batched request for full records
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub ids: Vec<RecordId>,
}

/// Records returned for a [`PullRequest`]; unknown IDs are omitted
pub type PullResponse = Vec<Record>;
