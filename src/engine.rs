//! Engine Module
//!
//! Wires log, replication and replay together for one node.
//!
//! ## Responsibilities
//! - Primary: commit record blocks (append, flush, apply), recover on
//!   startup, ship to backups
//! - Backup: bootstrap from a primary, recover the received log, run the
//!   streaming daemon
//! - Expose the in-memory table for reads

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::{Config, ReplayStrategyKind};
use crate::error::Result;
use crate::memtable::MemTable;
use crate::network::{ReplicationServer, TcpLink};
use crate::replay::{self, Replay, ReplayRange, ReplayStats, ReplayStrategy};
use crate::replication::{
    clear_interrupted_bootstrap, receive_bootstrap, BackupDaemon, PrimaryDaemon,
};
use crate::storage::{CheckpointDescriptor, FileRegistry};
use crate::transport::Channel;
use crate::wal::{LogManager, LogRecord, Lsn, ScannedRecord};

/// One replication node
///
/// ## Concurrency Model
/// - **Commits** are serialized by `commit_lock` so records reach the
///   table in log order
/// - **Reads** go straight to the sharded [`MemTable`]
/// - Shipping and backup streaming run on their own threads and share the
///   log and the table through `Arc`
pub struct Engine {
    config: Config,
    log: Arc<LogManager>,
    table: Arc<MemTable>,
    commit_lock: Mutex<()>,
}

impl Engine {
    /// Open a primary over `config.log_dir`
    ///
    /// On startup:
    /// 1. Validate the configuration
    /// 2. Open the log (creating segment 1 if the directory is empty)
    /// 3. Replay from the latest checkpoint to the durable end
    pub fn open_primary(config: Config) -> Result<Self> {
        // Step 1: Reject bad options before touching the disk
        config.validate()?;

        // Step 2: Open the log
        let log = Arc::new(LogManager::open(&config)?);

        let engine = Self {
            config,
            log,
            table: Arc::new(MemTable::new()),
            commit_lock: Mutex::new(()),
        };

        // Step 3: Rebuild in-memory state
        let stats = engine.recover()?;
        tracing::info!(
            "Primary opened at {}: {} records recovered",
            engine.log.durable_lsn(),
            stats.records_applied
        );
        Ok(engine)
    }

    /// Bootstrap a backup from `channel` into the empty `config.log_dir`
    ///
    /// Files of an interrupted earlier bootstrap are cleared first.
    ///
    /// Returns the engine and the streaming thread. Initial recovery runs
    /// before the thread starts when `recover_first` is set, after it
    /// otherwise; the two cover disjoint ranges.
    pub fn bootstrap_backup<C>(config: Config, mut channel: C) -> Result<(Self, JoinHandle<Result<()>>)>
    where
        C: Channel + 'static,
    {
        config.validate()?;

        // Step 1: Receive checkpoint and segments
        let registry = Arc::new(FileRegistry::open(&config.log_dir)?);
        clear_interrupted_bootstrap(&registry)?;
        let metadata = receive_bootstrap(&mut channel, &registry)?;

        // Step 2: Open the received log
        let log = Arc::new(LogManager::with_registry(registry, config.segment_size)?);
        let engine = Self {
            config,
            log,
            table: Arc::new(MemTable::new()),
            commit_lock: Mutex::new(()),
        };

        // Step 3: Recovery and streaming
        let recovery = ReplayRange::new(metadata.checkpoint.start_lsn, metadata.end_lsn);
        let daemon = BackupDaemon::new(
            channel,
            Arc::clone(&engine.log),
            engine.table.clone(),
            &engine.config,
            metadata.end_lsn,
        );

        let handle = if engine.config.recover_first {
            engine.replay_range(engine.config.replay_strategy, &recovery)?;
            daemon.spawn()?
        } else {
            let handle = daemon.spawn()?;
            engine.replay_range(engine.config.replay_strategy, &recovery)?;
            handle
        };

        tracing::info!("Backup recovered to {}, streaming", metadata.end_lsn);
        Ok((engine, handle))
    }

    /// Connect to `config.primary_addr` and bootstrap over TCP
    pub fn connect_backup(config: Config) -> Result<(Self, JoinHandle<Result<()>>)> {
        let endpoint = TcpLink::connect(&config.primary_addr)?.into_endpoint(&config)?;
        Self::bootstrap_backup(config, endpoint)
    }

    // =========================================================================
    // Primary Operations
    // =========================================================================

    /// Log one block of records, make it durable, then apply it
    ///
    /// Returns the block's LSN.
    pub fn commit(&self, records: &[LogRecord]) -> Result<Lsn> {
        let _guard = self.commit_lock.lock();

        // Step 1: Durable first
        let lsn = self.log.append(records)?;
        self.log.flush()?;

        // Step 2: Apply with the same LSNs replay would assign
        for (i, record) in records.iter().enumerate() {
            let scanned = ScannedRecord {
                lsn: lsn.advance(i as u64),
                record: record.clone(),
            };
            replay::apply(self.table.as_ref(), &scanned)?;
        }
        Ok(lsn)
    }

    /// Record an opaque checkpoint payload at the current durable end
    pub fn checkpoint(&self, payload: &[u8]) -> Result<CheckpointDescriptor> {
        let _guard = self.commit_lock.lock();
        let at = self.log.durable_lsn();
        CheckpointDescriptor::install(self.log.registry(), at, at.offset(), payload)
    }

    /// Start shipping to a backup on `channel`
    pub fn ship_to<C: Channel + 'static>(&self, channel: C) -> Result<JoinHandle<Result<()>>> {
        PrimaryDaemon::new(Arc::clone(&self.log), &self.config).spawn(channel)
    }

    /// Listen for backups on `config.listen_addr`
    pub fn replication_server(&self) -> Result<ReplicationServer> {
        ReplicationServer::bind(self.config.clone(), Arc::clone(&self.log))
    }

    /// Stop shipping; daemons finish the flushes already handed to them
    pub fn close(&self) {
        self.log.close_subscriptions();
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// First LSN replay must cover: the checkpoint start, or the log start
    pub fn replay_start(&self) -> Result<Lsn> {
        match CheckpointDescriptor::discover(self.log.registry(), self.log.segments())? {
            Some(checkpoint) => Ok(checkpoint.start_lsn),
            None => self.log.start_lsn(),
        }
    }

    /// Replay `[replay_start, durable end)` with the configured strategy
    pub fn recover(&self) -> Result<ReplayStats> {
        let range = ReplayRange::new(self.replay_start()?, self.log.durable_lsn());
        self.replay_range(self.config.replay_strategy, &range)
    }

    /// Replay a range into the table
    pub fn replay_range(&self, kind: ReplayStrategyKind, range: &ReplayRange) -> Result<ReplayStats> {
        let strategy = ReplayStrategy::from_config(kind, &self.config);
        strategy.replay(&self.log.scanner(), self.table.as_ref(), range)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn table(&self) -> &Arc<MemTable> {
        &self.table
    }

    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn durable_lsn(&self) -> Lsn {
        self.log.durable_lsn()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
