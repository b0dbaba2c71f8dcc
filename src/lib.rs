//! # AtlasRep
//!
//! Log shipping and parallel replay for a main-memory database:
//! - Segmented write-ahead log with CRC-checked record blocks
//! - Bootstrap of new backups from checkpoint + historical segments
//! - Live streaming over a half-duplex, buffer-reuse transport
//! - Durable persistence of shipped ranges on every backup
//! - OID- and offset-partitioned parallel replay
//!
//! ## Architecture Overview
//!
//! ```text
//!            PRIMARY                                   BACKUP
//! ┌──────────────────────────┐            ┌──────────────────────────┐
//! │ Engine::commit           │            │ BackupDaemon             │
//! │   append → flush         │            │   signal Ready           │
//! └────────────┬─────────────┘            │   receive bounds + chunk │
//!              │ FlushBatch               │   persist (fsync)        │
//! ┌────────────▼─────────────┐  Channel   │   replay (offset)        │
//! │ PrimaryDaemon (per link) ├───────────▶│   signal Persisted       │
//! │   bootstrap, then stream │◀───────────┤                          │
//! └──────────────────────────┘  signals   └────────────┬─────────────┘
//!                                                      │
//!                                               ┌──────▼──────┐
//!                                               │  MemTable   │
//!                                               └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod memtable;
pub mod network;
pub mod protocol;
pub mod replay;
pub mod replication;
pub mod storage;
pub mod transport;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, ReplayStrategyKind, Role};
pub use engine::Engine;
pub use error::{RepError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasRep
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
