//! MemTable Module
//!
//! In-memory tuple versions rebuilt by log replay.
//!
//! ## Responsibilities
//! - Hold one version chain per (table, OID), newest first
//! - Keep primary keys and index entries pointing at OIDs
//! - Stay deterministic under any replay order: chains are ordered by LSN
//!   and re-installing an LSN already present is a no-op
//!
//! ## Data Structure Choice
//! Per-table OID maps split into shards, each behind a parking_lot RwLock:
//! - OID-partitioned workers touch disjoint OIDs and rarely share a shard
//! - Readers clone an `Arc<Version>` and never block writers for long

mod table;

pub use table::{MemTable, TableSnapshot};

use crate::wal::Lsn;

/// One version of a tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Position of the record that produced this version
    pub lsn: Lsn,

    /// Tuple bytes; `None` is a delete tombstone
    pub data: Option<Vec<u8>>,
}

impl Version {
    pub fn is_tombstone(&self) -> bool {
        self.data.is_none()
    }
}
