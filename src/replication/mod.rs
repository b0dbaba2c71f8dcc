//! Replication Module
//!
//! Ships the log from a primary to its backups.
//!
//! ## Architecture
//! - Primary: one [`PrimaryDaemon`] thread per backup, fed by the log
//!   manager's flush subscription
//! - Backup: [`receive_bootstrap`] once, then a [`BackupDaemon`] thread
//! - Both sides talk through a half-duplex [`Channel`](crate::transport::Channel)

mod backup;
mod metadata;
mod primary;

pub use backup::{clear_interrupted_bootstrap, receive_bootstrap, BackupDaemon, RoundOutcome, StreamState};
pub use metadata::{BootstrapMetadata, LogSegmentDescriptor, METADATA_FRAMING_SIZE};
pub use primary::PrimaryDaemon;
