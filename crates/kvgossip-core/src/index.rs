//! Concurrent ordered index: a skip list of records keyed by ID
//!
//! Nodes live in an arena inside one `RwLock`, so every writer holds the
//! whole structure exclusively for its traversal and splice while readers
//! share it. Callers only ever get [`Record`] copies back.

use crate::types::{Digest, Record, RecordId, Version};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::fmt;

/// Highest level a node can be promoted to
pub const MAX_LEVEL: usize = 16;

/// Chance of promoting a node one more level
pub const PROMOTION_PROBABILITY: f64 = 0.5;

/// Arena slot of the sentinel head
const HEAD: usize = 0;

#[derive(Debug, Default)]
struct Node {
    record: Record,
    /// Next node per level; length is the node's level
    forward: Vec<Option<usize>>,
}

struct Inner {
    nodes: Vec<Node>,
    /// Recycled arena slots
    free: Vec<usize>,
    /// Number of active levels (at least 1)
    level: usize,
    len: usize,
    rng: Box<dyn RngCore + Send + Sync>,
}

impl Inner {
    fn new(rng: Box<dyn RngCore + Send + Sync>) -> Self {
        let head = Node {
            record: Record::default(),
            forward: vec![None; MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            level: 1,
            len: 0,
            rng,
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen_bool(PROMOTION_PROBABILITY) {
            level += 1;
        }
        level
    }

    /// Last node before `id` on each of the lowest `top` levels
    fn predecessors(&self, id: RecordId, top: usize) -> [usize; MAX_LEVEL] {
        let mut update = [HEAD; MAX_LEVEL];
        let mut current = HEAD;
        for level in (0..top).rev() {
            while let Some(next) = self.nodes[current].forward[level] {
                if self.nodes[next].record.id >= id {
                    break;
                }
                current = next;
            }
            update[level] = current;
        }
        update
    }

    fn find(&self, id: RecordId) -> Option<usize> {
        let update = self.predecessors(id, self.level);
        self.nodes[update[0]].forward[0].filter(|&next| self.nodes[next].record.id == id)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn insert(&mut self, record: Record) {
        let level = self.random_level();
        let update = self.predecessors(record.id, self.level.max(level));

        let forward = (0..level)
            .map(|i| self.nodes[update[i]].forward[i])
            .collect();
        let slot = self.alloc(Node { record, forward });
        for (i, &prev) in update.iter().enumerate().take(level) {
            self.nodes[prev].forward[i] = Some(slot);
        }

        if level > self.level {
            self.level = level;
        }
        self.len += 1;
    }

    fn remove(&mut self, id: RecordId) -> Option<Record> {
        let update = self.predecessors(id, self.level);
        let target =
            self.nodes[update[0]].forward[0].filter(|&next| self.nodes[next].record.id == id)?;

        for (i, &prev) in update.iter().enumerate().take(self.level) {
            if self.nodes[prev].forward[i] != Some(target) {
                break;
            }
            self.nodes[prev].forward[i] = self.nodes[target].forward[i];
        }
        while self.level > 1 && self.nodes[HEAD].forward[self.level - 1].is_none() {
            self.level -= 1;
        }

        let node = std::mem::take(&mut self.nodes[target]);
        self.free.push(target);
        self.len -= 1;
        Some(node.record)
    }

    /// Level-0 walk in ID order
    fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        let mut cursor = self.nodes[HEAD].forward[0];
        std::iter::from_fn(move || {
            let slot = cursor?;
            cursor = self.nodes[slot].forward[0];
            Some(&self.nodes[slot].record)
        })
    }
}

/// Skip list holding live and tombstoned records in ID order
pub struct SkipList {
    inner: RwLock<Inner>,
}

impl SkipList {
    /// Create an empty index with an entropy-seeded level generator
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty index with a fixed seed (deterministic levels)
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Create an empty index drawing levels from `rng`
    pub fn with_rng(rng: impl RngCore + Send + Sync + 'static) -> Self {
        Self {
            inner: RwLock::new(Inner::new(Box::new(rng))),
        }
    }

    /// Insert a record without checking for an existing ID.
    ///
    /// Callers that need uniqueness must check first (or use [`update`](Self::update)).
    pub fn insert(&self, record: Record) {
        self.inner.write().insert(record);
    }

    /// Look up a record by ID
    pub fn search(&self, id: RecordId) -> Option<Record> {
        let inner = self.inner.read();
        inner.find(id).map(|slot| inner.nodes[slot].record.clone())
    }

    /// Physically remove a record. Missing IDs are a no-op.
    pub fn delete(&self, id: RecordId) -> Option<Record> {
        self.inner.write().remove(id)
    }

    /// Replace the record with the same ID in place, or insert it.
    ///
    /// Runs under one exclusive section, so readers never see the ID missing.
    /// Returns the previous record.
    pub fn update(&self, record: Record) -> Option<Record> {
        let mut inner = self.inner.write();
        match inner.find(record.id) {
            Some(slot) => Some(std::mem::replace(&mut inner.nodes[slot].record, record)),
            None => {
                inner.insert(record);
                None
            }
        }
    }

    /// Insert `record` unless a live record with its ID exists.
    ///
    /// A tombstone with the same ID is replaced. Returns whether the record
    /// was stored.
    pub fn insert_vacant(&self, record: Record) -> bool {
        let mut inner = self.inner.write();
        match inner.find(record.id) {
            Some(slot) if !inner.nodes[slot].record.is_tombstone() => false,
            Some(slot) => {
                inner.nodes[slot].record = record;
                true
            }
            None => {
                inner.insert(record);
                true
            }
        }
    }

    /// Last-write-wins merge of a copy received from a peer.
    ///
    /// Applies `incoming` (tombstone or not) if the ID is unknown or the
    /// incoming version is strictly newer. Returns whether anything changed.
    pub fn merge(&self, incoming: Record) -> bool {
        let mut inner = self.inner.write();
        match inner.find(incoming.id) {
            Some(slot) if !incoming.supersedes(Some(&inner.nodes[slot].record)) => false,
            Some(slot) => {
                inner.nodes[slot].record = incoming;
                true
            }
            None => {
                inner.insert(incoming);
                true
            }
        }
    }

    /// Mark a record deleted with a new version, keeping it in the index
    pub fn tombstone(&self, id: RecordId, version: Version) -> Option<Record> {
        let mut inner = self.inner.write();
        let slot = inner.find(id)?;
        let record = &mut inner.nodes[slot].record;
        record.deleted = true;
        record.version = version;
        Some(record.clone())
    }

    /// Number of records, tombstones included
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned records
    pub fn tombstone_count(&self) -> usize {
        self.inner.read().iter().filter(|r| r.is_tombstone()).count()
    }

    /// Current number of active levels
    pub fn level(&self) -> usize {
        self.inner.read().level
    }

    /// Record with the lowest ID
    pub fn first(&self) -> Option<Record> {
        self.inner.read().iter().next().cloned()
    }

    /// Copy of every record in ID order
    pub fn records(&self) -> Vec<Record> {
        self.inner.read().iter().cloned().collect()
    }

    /// Version snapshot of every record, taken under one read lock
    pub fn digest(&self) -> Digest {
        self.inner
            .read()
            .iter()
            .map(|record| (record.id, record.version))
            .collect()
    }

    /// Copies of the requested records; unknown IDs are skipped
    pub fn get_many(&self, ids: &[RecordId]) -> Vec<Record> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|&id| inner.find(id).map(|slot| inner.nodes[slot].record.clone()))
            .collect()
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SkipList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SkipList")
            .field("len", &inner.len)
            .field("level", &inner.level)
            .finish()
    }
}
