//! kvgossip Core Library
//!
//! This crate provides the replicated record model and the concurrent
//! ordered index every kvgossip node stores its records in.
//!
//! # Modules
//!
//! - [`types`]: Records, versions, digests, and sync messages
//! - [`index`]: Skip list keyed by record ID with last-write-wins merge
//! - [`clock`]: Wall-clock version issuing

pub mod clock;
pub mod index;
pub mod types;

pub use clock::VersionClock;
pub use index::SkipList;
pub use types::*;
