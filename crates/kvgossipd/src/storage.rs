//! Seed store: the sled database a node bootstraps its index from

use kvgossip_core::types::{Record, RecordId};
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// Record table loaded once at startup.
///
/// The running index is never written back here.
pub struct SeedStore {
    db: Db,
    /// Record tree: id -> Record
    records: sled::Tree,
}

/// Order-preserving key for signed IDs
fn record_key(id: RecordId) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

impl SeedStore {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let records = db.open_tree("records")?;
        Ok(Self { db, records })
    }

    /// Store a record
    pub fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(record)?;
        self.records.insert(record_key(record.id), value)?;
        Ok(())
    }

    /// All records in ID order
    pub fn all_records(&self) -> impl Iterator<Item = Result<Record, StorageError>> + '_ {
        self.records.iter().map(|result| {
            let (_, bytes) = result?;
            let record: Record = postcard::from_bytes(&bytes)?;
            Ok(record)
        })
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
