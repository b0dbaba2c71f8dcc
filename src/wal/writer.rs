//! Log Manager
//!
//! Owns the segment directory and the segment files of one node.
//!
//! ## Responsibilities
//! - Discover segments on startup (or create the first one)
//! - Primary: buffer appended blocks, roll segments, flush and publish
//!   every flush to subscribed shippers
//! - Backup: create segments announced by the primary and durably write
//!   shipped byte ranges
//!
//! ## Concurrency:
//! - `state` is the flush lock; appends, flushes, segment creation and
//!   shipper subscription all serialize on it
//! - Subscribers are fed through bounded channels while the lock is held,
//!   so a slow backup throttles flushing but never reorders it

use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{RepError, Result};
use crate::storage::{names, CheckpointDescriptor, FileHandle, FileRegistry};

use super::record::{encode_block, LogRecord};
use super::{LogScanner, Lsn, SegmentDirectory, SegmentId};

/// Bytes of one flush that landed in a single segment
#[derive(Debug, Clone)]
pub struct FlushPiece {
    pub start: Lsn,
    pub bytes: Bytes,
    /// Set when this piece opens a new segment: distance from the previous
    /// segment's start offset to this segment's start offset
    pub new_segment: Option<u64>,
}

impl FlushPiece {
    pub fn end(&self) -> Lsn {
        self.start.advance(self.bytes.len() as u64)
    }
}

/// Everything made durable by one flush, in log order
#[derive(Debug, Clone)]
pub struct FlushBatch {
    pub pieces: Vec<FlushPiece>,
    pub block_starts: Vec<Lsn>,
}

impl FlushBatch {
    pub fn start(&self) -> Option<Lsn> {
        self.pieces.first().map(|p| p.start)
    }

    pub fn end(&self) -> Option<Lsn> {
        self.pieces.last().map(|p| p.end())
    }

    pub fn len(&self) -> u64 {
        self.pieces.iter().map(|p| p.bytes.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

struct PendingPiece {
    segment: Arc<SegmentId>,
    handle: FileHandle,
    start: Lsn,
    bytes: BytesMut,
    new_segment: Option<u64>,
}

struct LogState {
    current: Arc<SegmentId>,
    current_handle: FileHandle,
    /// Next append position (includes unflushed bytes)
    tail: Lsn,
    durable: Lsn,
    pending: Vec<PendingPiece>,
    pending_blocks: Vec<Lsn>,
    subscribers: Vec<Sender<Arc<FlushBatch>>>,
}

/// Segment files plus the append/flush path of one node
pub struct LogManager {
    registry: Arc<FileRegistry>,
    segments: SegmentDirectory,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Open the log in `config.log_dir`
    pub fn open(config: &Config) -> Result<Self> {
        let registry = Arc::new(FileRegistry::open(&config.log_dir)?);
        Self::with_registry(registry, config.segment_size)
    }

    /// Open the log over an existing registry
    ///
    /// On startup:
    /// 1. Discover segment files and order them by segment number
    /// 2. Create segment 1 at offset 0 if the directory holds none
    /// 3. Cut a partially written block off the end of the last segment
    /// 4. The durable end is the end of the last complete block
    pub fn with_registry(registry: Arc<FileRegistry>, segment_size: u64) -> Result<Self> {
        let segments = SegmentDirectory::new(segment_size);

        let mut found = registry
            .list()?
            .iter()
            .filter(|name| names::is_segment_file_name(name))
            .map(|name| SegmentId::from_file_name(name))
            .collect::<Result<Vec<_>>>()?;
        found.sort_by_key(|s| s.segnum);
        for segment in found {
            segments.insert(segment)?;
        }

        if segments.is_empty() {
            let first = segments.create_segment(1, 0)?;
            registry.create_file(&first.file_name())?;
            registry.sync_dir()?;
            tracing::info!("Created first log segment {}", first.file_name());
        }

        let current = segments
            .last_segment()
            .ok_or(RepError::MissingSegment(0))?;
        let current_handle = registry.create_file(&current.file_name())?;
        let durable = Self::cut_torn_tail(&segments, &registry, &current, current_handle)?;

        tracing::debug!(
            "Log opened: {} segments, durable end {}",
            segments.len(),
            durable
        );

        Ok(Self {
            registry,
            segments,
            state: Mutex::new(LogState {
                current,
                current_handle,
                tail: durable,
                durable,
                pending: Vec::new(),
                pending_blocks: Vec::new(),
                subscribers: Vec::new(),
            }),
        })
    }

    /// Scan the last segment and truncate anything after its last complete
    /// block; returns the resulting end of data
    ///
    /// A bootstrapped segment holds no blocks before the checkpoint start,
    /// so the scan begins there when the checkpoint lives in this segment.
    fn cut_torn_tail(
        segments: &SegmentDirectory,
        registry: &FileRegistry,
        current: &SegmentId,
        handle: FileHandle,
    ) -> Result<Lsn> {
        let data_len = registry.len(handle)?;
        let data_end = (current.start_offset + data_len).min(current.end_offset);

        let from = match CheckpointDescriptor::discover(registry, segments)? {
            Some(checkpoint) if checkpoint.start_lsn.segment() == current.segnum => {
                checkpoint.start_lsn
            }
            _ => current.start_lsn(),
        };
        if data_end <= from.offset() {
            return Ok(Lsn::make(data_end, current.segnum));
        }

        let mut blocks = LogScanner::new(segments, registry).blocks(from, data_end);
        let damage = blocks.by_ref().find_map(|block| block.err());
        let valid_end = blocks.position();
        if let Some(e) = damage {
            tracing::warn!("Log ends in a damaged block at {}: {}", valid_end, e);
        }

        if valid_end.offset() < current.start_offset + data_len {
            tracing::warn!(
                "Truncating {} from {} to {} bytes",
                current.file_name(),
                data_len,
                current.file_offset(valid_end.offset())
            );
            registry.truncate(handle, current.file_offset(valid_end.offset()))?;
            registry.sync(handle)?;
        }
        Ok(valid_end)
    }

    // =========================================================================
    // Primary: append / flush / ship
    // =========================================================================

    /// Append one block of records; returns the block's LSN
    ///
    /// The block is buffered until the next [`flush`](Self::flush). A block
    /// that does not fit in the current segment opens the next segment at the
    /// current segment's end offset.
    pub fn append(&self, records: &[LogRecord]) -> Result<Lsn> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut lsn = state.tail;
        let mut block = encode_block(lsn, records)?;

        if lsn.offset() + block.len() as u64 > state.current.end_offset {
            if block.len() as u64 > self.segments.segment_size() {
                return Err(RepError::Config(format!(
                    "block of {} bytes exceeds segment size {}",
                    block.len(),
                    self.segments.segment_size()
                )));
            }
            let (segment, handle) = self.open_segment(state.current.end_offset)?;
            let delta = segment.start_offset - state.current.start_offset;
            state.current = segment;
            state.current_handle = handle;
            lsn = state.current.start_lsn();
            block = encode_block(lsn, records)?;
            state.pending.push(PendingPiece {
                segment: Arc::clone(&state.current),
                handle,
                start: lsn,
                bytes: BytesMut::new(),
                new_segment: Some(delta),
            });
        }

        let needs_piece = state
            .pending
            .last()
            .map_or(true, |p| p.segment.segnum != state.current.segnum);
        if needs_piece {
            let piece = PendingPiece {
                segment: Arc::clone(&state.current),
                handle: state.current_handle,
                start: lsn,
                bytes: BytesMut::new(),
                new_segment: None,
            };
            state.pending.push(piece);
        }

        if let Some(piece) = state.pending.last_mut() {
            piece.bytes.extend_from_slice(&block);
        }
        state.pending_blocks.push(lsn);
        state.tail = lsn.advance(block.len() as u64);
        Ok(lsn)
    }

    /// Write buffered blocks to their segment files, fsync, and hand the
    /// flushed range to every subscribed shipper
    ///
    /// Returns the new durable end.
    pub fn flush(&self) -> Result<Lsn> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.pending.is_empty() {
            return Ok(state.durable);
        }

        let pending = std::mem::take(&mut state.pending);
        let block_starts = std::mem::take(&mut state.pending_blocks);

        let mut pieces = Vec::with_capacity(pending.len());
        for piece in pending {
            let file_offset = piece.segment.file_offset(piece.start.offset());
            self.registry
                .write_durable(piece.handle, file_offset, &piece.bytes)?;
            let piece = FlushPiece {
                start: piece.start,
                bytes: piece.bytes.freeze(),
                new_segment: piece.new_segment,
            };
            state.durable = piece.end();
            pieces.push(piece);
        }

        let batch = Arc::new(FlushBatch {
            pieces,
            block_starts,
        });
        tracing::trace!("Flushed {} bytes, durable end {}", batch.len(), state.durable);

        // Drop shippers whose connection went away
        state
            .subscribers
            .retain(|tx| tx.send(Arc::clone(&batch)).is_ok());

        Ok(state.durable)
    }

    /// Register a shipper and take a consistent snapshot of the durable log
    ///
    /// `snapshot` runs under the flush lock with the current durable end, so
    /// every byte is either covered by the snapshot or delivered through the
    /// returned receiver, never both and never neither.
    pub fn subscribe<T>(
        &self,
        snapshot: impl FnOnce(Lsn) -> Result<T>,
    ) -> Result<(Receiver<Arc<FlushBatch>>, T)> {
        let mut state = self.state.lock();
        let taken = snapshot(state.durable)?;
        let (tx, rx) = bounded(1);
        state.subscribers.push(tx);
        Ok((rx, taken))
    }

    /// Drop every shipper subscription; their streams end after draining
    pub fn close_subscriptions(&self) {
        let dropped = std::mem::take(&mut self.state.lock().subscribers);
        tracing::debug!("Closed {} flush subscriptions", dropped.len());
    }

    // =========================================================================
    // Backup: persist shipped bytes
    // =========================================================================

    /// Create the segment following the current one at `start_offset`
    pub fn create_next_segment(&self, start_offset: u64) -> Result<Arc<SegmentId>> {
        let mut state = self.state.lock();
        let (segment, handle) = self.open_segment(start_offset)?;
        state.current = Arc::clone(&segment);
        state.current_handle = handle;
        Ok(segment)
    }

    /// Durably write shipped bytes starting at `start`; returns the end LSN
    ///
    /// The covering segment must already exist and be large enough.
    pub fn persist_shipped(&self, start: Lsn, bytes: &[u8]) -> Result<Lsn> {
        let mut state = self.state.lock();

        let segment = self.segments.segment_of(start)?;
        let end = start.advance(bytes.len() as u64);
        if end.offset() > segment.end_offset {
            return Err(RepError::Protocol(format!(
                "range {}-{} overruns segment {} ending at 0x{:x}",
                start, end, segment.segnum, segment.end_offset
            )));
        }

        let handle = self.registry.create_file(&segment.file_name())?;
        let written = self
            .registry
            .write_durable(handle, segment.file_offset(start.offset()), bytes);
        self.registry.close(handle);
        written?;

        state.durable = end;
        state.tail = end;
        Ok(end)
    }

    fn open_segment(&self, start_offset: u64) -> Result<(Arc<SegmentId>, FileHandle)> {
        let segnum = self
            .segments
            .last_segment()
            .map_or(1, |last| last.segnum + 1);
        let segment = self.segments.create_segment(segnum, start_offset)?;
        let handle = self.registry.create_file(&segment.file_name())?;
        self.registry.sync_dir()?;
        tracing::debug!(
            "Opened segment {} [0x{:x}, 0x{:x})",
            segment.segnum,
            segment.start_offset,
            segment.end_offset
        );
        Ok((segment, handle))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// End of durable data
    pub fn durable_lsn(&self) -> Lsn {
        self.state.lock().durable
    }

    /// Next append position
    pub fn tail_lsn(&self) -> Lsn {
        self.state.lock().tail
    }

    /// First position of the log
    pub fn start_lsn(&self) -> Result<Lsn> {
        self.segments
            .first_segment()
            .map(|s| s.start_lsn())
            .ok_or(RepError::MissingSegment(0))
    }

    pub fn segments(&self) -> &SegmentDirectory {
        &self.segments
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn log_dir(&self) -> &Path {
        self.registry.dir()
    }

    pub fn scanner(&self) -> LogScanner<'_> {
        LogScanner::new(&self.segments, &self.registry)
    }
}
