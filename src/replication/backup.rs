//! Backup replication daemon
//!
//! Receives the bootstrap stream into an empty log directory, then loops
//! over live chunks:
//!
//! ```text
//!  AwaitingData ──signal Ready──▶ Receiving ──bounds + chunk──▶ Persisting
//!       ▲                                                         │
//!       └──────────── Acked ◀──signal Persisted── (replay) ◀──────┘
//! ```
//!
//! A range is written and synced before it is replayed, and replayed before
//! it is acknowledged.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::error::{RepError, Result};
use crate::protocol::Condition;
use crate::replay::{OffsetPartitioned, RedoTarget, Replay, ReplayRange};
use crate::storage::{names, FileHandle, FileRegistry};
use crate::transport::{new_segment_delta, Channel};
use crate::wal::{LogManager, Lsn};

use super::BootstrapMetadata;

// =============================================================================
// Bootstrap
// =============================================================================

/// A file being filled from the channel
struct IncomingFile<'a> {
    registry: &'a FileRegistry,
    name: String,
    handle: FileHandle,
    base: u64,
    expected: u64,
    written: u64,
}

impl<'a> IncomingFile<'a> {
    fn create(registry: &'a FileRegistry, name: &str, base: u64, expected: u64) -> Result<Self> {
        let handle = registry.create_file(name)?;
        registry.truncate(handle, base)?;
        Ok(Self {
            registry,
            name: name.to_string(),
            handle,
            base,
            expected,
            written: 0,
        })
    }

    fn remaining(&self) -> u64 {
        self.expected - self.written
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.remaining() {
            return Err(RepError::Protocol(format!(
                "{} bytes received for {} with only {} bytes left",
                bytes.len(),
                self.name,
                self.remaining()
            )));
        }
        self.registry
            .write_at(self.handle, self.base + self.written, bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Sync and drop the promise
    fn finish(self) -> Result<()> {
        if self.written != self.expected {
            return Err(RepError::ShortTransfer {
                expected: self.expected,
                actual: self.written,
            });
        }
        self.registry.sync(self.handle)?;
        self.registry.close(self.handle);
        BootstrapMetadata::complete_promise(self.registry, &self.name)
    }
}

/// Receive chunks until `file` holds its declared size
fn fill<C: Channel>(channel: &mut C, file: &mut IncomingFile<'_>) -> Result<()> {
    while file.remaining() > 0 {
        channel.signal(Condition::ReadyToReceive)?;
        let received = channel.receive_imm()?;
        check_chunk_imm(received.imm, received.data.len())?;
        file.write(received.data)?;
    }
    Ok(())
}

fn check_chunk_imm(imm: u32, len: usize) -> Result<()> {
    if imm as usize != len {
        return Err(RepError::ShortTransfer {
            expected: u64::from(imm),
            actual: len as u64,
        });
    }
    Ok(())
}

/// Make `registry`'s directory ready to receive a bootstrap
///
/// Pending promises mean an earlier bootstrap died midway: its log,
/// checkpoint and promise files are removed so the new stream starts from
/// an empty directory. A complete log without promises is left alone and
/// refused. Returns the number of files removed.
pub fn clear_interrupted_bootstrap(registry: &FileRegistry) -> Result<usize> {
    let pending = BootstrapMetadata::pending_promises(registry)?;
    let leftovers: Vec<String> = registry
        .list()?
        .into_iter()
        .filter(|name| is_bootstrap_file(name))
        .collect();

    if pending.is_empty() {
        if !leftovers.is_empty() {
            return Err(RepError::Config(format!(
                "{} already holds a log ({} files)",
                registry.dir().display(),
                leftovers.len()
            )));
        }
        return Ok(0);
    }

    for (name, size) in &pending {
        tracing::warn!("Interrupted bootstrap left {} short of {} bytes", name, size);
    }
    for name in &leftovers {
        registry.remove(name)?;
    }
    registry.sync_dir()?;

    tracing::info!(
        "Cleared {} files of an interrupted bootstrap in {}",
        leftovers.len(),
        registry.dir().display()
    );
    Ok(leftovers.len())
}

fn is_bootstrap_file(name: &str) -> bool {
    name.starts_with(names::SEGMENT_PREFIX)
        || name.starts_with(names::CHECKPOINT_MARKER_PREFIX)
        || name.starts_with(names::CHECKPOINT_DATA_PREFIX)
        || name.ends_with(names::PROMISE_SUFFIX)
}

/// Receive a complete bootstrap stream into `registry`'s directory
pub fn receive_bootstrap<C: Channel>(
    channel: &mut C,
    registry: &FileRegistry,
) -> Result<BootstrapMetadata> {
    // Step 1: header and the first checkpoint bytes
    channel.signal(Condition::ReadyToReceive)?;
    let received = channel.receive_imm()?;
    check_chunk_imm(received.imm, received.data.len())?;
    let (metadata, header_len) = BootstrapMetadata::decode(received.data)?;
    let leading = received.data[header_len..].to_vec();

    tracing::info!(
        "Bootstrap from {}: checkpoint {} bytes, {} segments, ends at {}",
        channel.peer(),
        metadata.checkpoint.size,
        metadata.segments.len(),
        metadata.end_lsn
    );

    // Step 2: promises before any payload
    metadata.persist_marker_files(registry)?;

    // Step 3: checkpoint payload
    if metadata.checkpoint.is_present() {
        let mut file = IncomingFile::create(
            registry,
            &metadata.checkpoint.data_file_name(),
            0,
            metadata.checkpoint.size,
        )?;
        file.write(&leading)?;
        fill(channel, &mut file)?;
        file.finish()?;
    } else if !leading.is_empty() {
        return Err(RepError::Protocol(format!(
            "{} checkpoint bytes sent without a checkpoint",
            leading.len()
        )));
    }

    // Step 4: segments
    for segment in &metadata.segments {
        let mut file =
            IncomingFile::create(registry, &segment.file_name, segment.file_offset, segment.size)?;
        fill(channel, &mut file)?;
        file.finish()?;
        tracing::debug!("Received {} ({} bytes)", segment.file_name, segment.size);
    }

    registry.sync_dir()?;
    Ok(metadata)
}

// =============================================================================
// Streaming
// =============================================================================

/// Where the daemon is in its receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingData,
    Receiving,
    Persisting,
    Acked,
}

/// What one round did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub start: Lsn,
    pub end: Lsn,
    pub new_segment: bool,

    /// Where replay stands after the round (unchanged without sync redo)
    pub replayed_to: Lsn,
}

/// Persists and replays live chunks from a primary
pub struct BackupDaemon<C: Channel> {
    channel: C,
    log: Arc<LogManager>,
    target: Arc<dyn RedoTarget>,
    replay: OffsetPartitioned,
    sync_redo: bool,
    start_lsn: Lsn,
    redo_lsn: Lsn,
    state: StreamState,
}

impl<C: Channel> BackupDaemon<C> {
    /// Daemon resuming at `start_lsn`, the durable end after bootstrap
    pub fn new(
        channel: C,
        log: Arc<LogManager>,
        target: Arc<dyn RedoTarget>,
        config: &Config,
        start_lsn: Lsn,
    ) -> Self {
        Self {
            channel,
            log,
            target,
            replay: OffsetPartitioned::new(config.offset_replay_threads),
            sync_redo: config.log_ship_sync_redo,
            start_lsn,
            redo_lsn: start_lsn,
            state: StreamState::AwaitingData,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Next LSN expected from the primary
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// Everything before this LSN has been replayed
    pub fn redo_lsn(&self) -> Lsn {
        self.redo_lsn
    }

    /// One round: receive, persist, replay, acknowledge
    pub fn step(&mut self) -> Result<RoundOutcome> {
        self.state = StreamState::AwaitingData;
        self.channel.signal(Condition::ReadyToReceive)?;

        self.state = StreamState::Receiving;
        let bounds = self.channel.receive_bounds()?;
        let received = self.channel.receive_imm()?;

        let new_segment = match new_segment_delta(received.imm) {
            Some(delta) => {
                let current = self
                    .log
                    .segments()
                    .last_segment()
                    .ok_or(RepError::MissingSegment(self.start_lsn.offset()))?;
                let segment = self.log.create_next_segment(current.start_offset + delta)?;
                tracing::debug!(
                    "Primary opened segment {} at 0x{:x}",
                    segment.segnum,
                    segment.start_offset
                );
                self.start_lsn = segment.start_lsn();
                true
            }
            None => false,
        };

        self.state = StreamState::Persisting;
        let start = self.start_lsn;
        let end = self.log.persist_shipped(start, received.data)?;

        if self.sync_redo {
            let range = ReplayRange::new(self.redo_lsn, end)
                .with_split_points(bounds.split_points(self.redo_lsn, end));
            let stats = self
                .replay
                .replay(&self.log.scanner(), self.target.as_ref(), &range)?;
            self.redo_lsn = stats.reached;
        }

        self.channel.signal(Condition::Persisted)?;
        self.state = StreamState::Acked;
        self.start_lsn = end;

        tracing::trace!("Persisted [{}, {}), replayed to {}", start, end, self.redo_lsn);
        Ok(RoundOutcome {
            start,
            end,
            new_segment,
            replayed_to: self.redo_lsn,
        })
    }

    /// Loop until an error; a vanished primary is reported as one
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;
        }
    }
}

impl<C: Channel + 'static> BackupDaemon<C> {
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let name = format!("recv-{}", self.channel.peer());
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut daemon = self;
                let result = daemon.run();
                if let Err(e) = &result {
                    tracing::error!("Replication from {} stopped: {}", daemon.channel.peer(), e);
                }
                result
            })
            .map_err(RepError::Io)
    }
}
