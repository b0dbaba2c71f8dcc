//! Replay Module
//!
//! Parallel redo of a log range into in-memory state.
//!
//! ## Strategies
//! - [`OidPartitioned`]: every worker scans the whole range and applies the
//!   records of its OID partition. Correct for any range; used for full
//!   recovery.
//! - [`OffsetPartitioned`]: the range is cut into contiguous sub-ranges at
//!   caller-provided block boundaries; each worker scans only its own.
//!   Used for shipped increments on a backup. Split points that are not
//!   block starts give undefined results.
//!
//! Both spawn exactly their configured number of workers (fewer for the
//! offset strategy when there are not enough split points) and return only
//! after every worker finished.

mod handlers;
mod offset;
mod oid;

pub use handlers::{
    apply, prepare_version, recover_create_table, recover_index_insert, recover_insert,
    recover_update, recover_update_key,
};
pub use offset::OffsetPartitioned;
pub use oid::{OidPartition, OidPartitioned};

use crate::config::{Config, ReplayStrategyKind};
use crate::error::{RepError, Result};
use crate::memtable::Version;
use crate::wal::{Fid, LogScanner, Lsn, Oid};

/// Receiver of redo operations (the record manager)
pub trait RedoTarget: Send + Sync {
    fn create_table(&self, fid: Fid, name: &str);

    /// Link a fully built version into the tuple's chain in LSN order;
    /// returns false if a version with that LSN is already present
    fn install_version(&self, fid: Fid, oid: Oid, version: Version) -> bool;

    fn index_insert(&self, fid: Fid, key: &[u8], oid: Oid, lsn: Lsn);

    fn update_key(&self, fid: Fid, oid: Oid, key: &[u8], lsn: Lsn);
}

/// Half-open range `[from, to)` to replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRange {
    pub from: Lsn,
    pub to: Lsn,

    /// Block starts inside the range where work may be split
    pub split_points: Vec<Lsn>,
}

impl ReplayRange {
    pub fn new(from: Lsn, to: Lsn) -> Self {
        Self {
            from,
            to,
            split_points: Vec::new(),
        }
    }

    pub fn with_split_points(mut self, mut points: Vec<Lsn>) -> Self {
        points.retain(|p| p.offset() > self.from.offset() && p.offset() < self.to.offset());
        points.sort();
        points.dedup();
        self.split_points = points;
        self
    }
}

/// Outcome of one replay call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub workers: usize,
    pub blocks_scanned: u64,
    pub records_scanned: u64,
    pub records_applied: u64,

    /// Where replay stopped: `to`, or the start of the first block that
    /// was not completely available
    pub reached: Lsn,
}

impl ReplayStats {
    fn empty(at: Lsn) -> Self {
        Self {
            workers: 0,
            blocks_scanned: 0,
            records_scanned: 0,
            records_applied: 0,
            reached: at,
        }
    }
}

/// A replay strategy
pub trait Replay {
    fn replay(
        &self,
        scanner: &LogScanner<'_>,
        target: &dyn RedoTarget,
        range: &ReplayRange,
    ) -> Result<ReplayStats>;
}

/// Strategy selected at the call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStrategy {
    Oid(OidPartitioned),
    Offset(OffsetPartitioned),
}

impl ReplayStrategy {
    pub fn from_config(kind: ReplayStrategyKind, config: &Config) -> Self {
        match kind {
            ReplayStrategyKind::Oid => {
                ReplayStrategy::Oid(OidPartitioned::new(config.oid_replay_threads))
            }
            ReplayStrategyKind::Offset => {
                ReplayStrategy::Offset(OffsetPartitioned::new(config.offset_replay_threads))
            }
        }
    }
}

impl Replay for ReplayStrategy {
    fn replay(
        &self,
        scanner: &LogScanner<'_>,
        target: &dyn RedoTarget,
        range: &ReplayRange,
    ) -> Result<ReplayStats> {
        match self {
            ReplayStrategy::Oid(strategy) => strategy.replay(scanner, target, range),
            ReplayStrategy::Offset(strategy) => strategy.replay(scanner, target, range),
        }
    }
}

/// Per-worker totals
#[derive(Debug, Default)]
struct WorkerStats {
    blocks: u64,
    scanned: u64,
    applied: u64,
    reached: Option<Lsn>,
}

fn worker_panicked() -> RepError {
    RepError::Protocol("replay worker panicked".to_string())
}
