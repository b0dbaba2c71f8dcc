//! Configuration for AtlasRep
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{RepError, Result};
use crate::protocol::{MAX_LOGBUF_PARTITIONS, MAX_PAYLOAD_SIZE};
use crate::transport::IMM_NEW_SEGMENT;

/// Role a node plays in the replication group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the log and ships it to backups
    Primary,

    /// Receives, persists and replays the log
    Backup,
}

impl FromStr for Role {
    type Err = RepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Role::Primary),
            "backup" => Ok(Role::Backup),
            other => Err(RepError::Config(format!("unknown role '{}'", other))),
        }
    }
}

/// Replay strategy used for full-log recovery at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStrategyKind {
    /// Partition work by object identifier; every worker scans the whole range
    Oid,

    /// Partition work by log offset; each worker scans only its sub-range
    Offset,
}

impl FromStr for ReplayStrategyKind {
    type Err = RepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "oid" => Ok(ReplayStrategyKind::Oid),
            "offset" => Ok(ReplayStrategyKind::Offset),
            other => Err(RepError::Config(format!("unknown replay strategy '{}'", other))),
        }
    }
}

/// Main configuration for an AtlasRep node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding log segments, checkpoint files and bootstrap markers
    /// Internal structure:
    ///   {log_dir}/
    ///     ├── log-<segnum>-<start>-<end>   (one file per log segment)
    ///     ├── chk-<start>-<end>            (checkpoint marker)
    ///     ├── chd-<start>                  (checkpoint data)
    ///     └── <name>.promise               (in-flight bootstrap promises)
    pub log_dir: PathBuf,

    /// Capacity of one log segment in bytes
    pub segment_size: u64,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Size of the reusable transport buffer (max bytes per chunk)
    pub transport_buffer_size: usize,

    /// Number of log buffer partitions described by the bounds table
    pub logbuf_partitions: usize,

    /// Primary waits for the backup's Persisted ack after every chunk
    pub ship_wait_persisted: bool,

    // -------------------------------------------------------------------------
    // Replay Configuration
    // -------------------------------------------------------------------------
    /// Worker count for OID-partitioned replay
    pub oid_replay_threads: usize,

    /// Worker count for offset-partitioned replay
    pub offset_replay_threads: usize,

    /// Strategy used for full recovery at startup
    pub replay_strategy: ReplayStrategyKind,

    /// Backup replays every shipped range right after persisting it
    pub log_ship_sync_redo: bool,

    /// Backup runs initial recovery before starting the streaming daemon
    pub recover_first: bool,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Primary listen address for backups
    pub listen_addr: String,

    /// Address of the primary (backup role)
    pub primary_addr: String,

    /// Number of backups the primary waits for
    pub num_backups: usize,

    /// Connection read timeout (milliseconds, 0 = blocking)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = blocking)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./atlasrep_log"),
            segment_size: 64 * 1024 * 1024, // 64 MB
            transport_buffer_size: 4 * 1024 * 1024, // 4 MB
            logbuf_partitions: 8,
            ship_wait_persisted: false,
            oid_replay_threads: 4,
            offset_replay_threads: 4,
            replay_strategy: ReplayStrategyKind::Oid,
            log_ship_sync_redo: true,
            recover_first: true,
            listen_addr: "127.0.0.1:7654".to_string(),
            primary_addr: "127.0.0.1:7654".to_string(),
            num_backups: 1,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check option ranges; violations are fatal at startup
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 || self.segment_size >= u64::from(IMM_NEW_SEGMENT) {
            return Err(RepError::Config(format!(
                "segment_size must be in 1..2^31, got {}",
                self.segment_size
            )));
        }
        // A full chunk plus its immediate value must fit one DATA frame
        let max_chunk = MAX_PAYLOAD_SIZE as usize - 4;
        if self.transport_buffer_size == 0 || self.transport_buffer_size > max_chunk {
            return Err(RepError::Config(format!(
                "transport_buffer_size must be in 1..={}, got {}",
                max_chunk, self.transport_buffer_size
            )));
        }
        if self.logbuf_partitions == 0 || self.logbuf_partitions > MAX_LOGBUF_PARTITIONS {
            return Err(RepError::Config(format!(
                "logbuf_partitions must be in 1..={}, got {}",
                MAX_LOGBUF_PARTITIONS, self.logbuf_partitions
            )));
        }
        if self.oid_replay_threads == 0 || self.offset_replay_threads == 0 {
            return Err(RepError::Config(
                "replay thread counts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log directory
    pub fn log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_dir = path.into();
        self
    }

    /// Set the segment capacity (in bytes)
    pub fn segment_size(mut self, size: u64) -> Self {
        self.config.segment_size = size;
        self
    }

    /// Set the transport buffer size (in bytes)
    pub fn transport_buffer_size(mut self, size: usize) -> Self {
        self.config.transport_buffer_size = size;
        self
    }

    /// Set the number of log buffer partitions
    pub fn logbuf_partitions(mut self, count: usize) -> Self {
        self.config.logbuf_partitions = count;
        self
    }

    /// Wait for Persisted after each shipped chunk
    pub fn ship_wait_persisted(mut self, wait: bool) -> Self {
        self.config.ship_wait_persisted = wait;
        self
    }

    /// Set the OID-partitioned replay worker count
    pub fn oid_replay_threads(mut self, count: usize) -> Self {
        self.config.oid_replay_threads = count;
        self
    }

    /// Set the offset-partitioned replay worker count
    pub fn offset_replay_threads(mut self, count: usize) -> Self {
        self.config.offset_replay_threads = count;
        self
    }

    /// Set the startup replay strategy
    pub fn replay_strategy(mut self, kind: ReplayStrategyKind) -> Self {
        self.config.replay_strategy = kind;
        self
    }

    /// Enable or disable synchronous redo on backups
    pub fn log_ship_sync_redo(mut self, enabled: bool) -> Self {
        self.config.log_ship_sync_redo = enabled;
        self
    }

    /// Run recovery before starting the backup streaming daemon
    pub fn recover_first(mut self, first: bool) -> Self {
        self.config.recover_first = first;
        self
    }

    /// Set the primary listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the primary address a backup connects to
    pub fn primary_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.primary_addr = addr.into();
        self
    }

    /// Set the number of backups
    pub fn num_backups(mut self, count: usize) -> Self {
        self.config.num_backups = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
