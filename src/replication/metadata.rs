//! Bootstrap metadata
//!
//! The header a primary sends as the first chunk to a new backup. It lists
//! the checkpoint payload and every log segment the backup must receive,
//! in the order their bytes follow on the channel.
//!
//! ## Encoding
//! ```text
//! ┌───────────┬──────────┬──────────┬──────────────────────┐
//! │ "BSMD"(4) │ Len (4)  │ CRC (4)  │ bincode body (Len)   │
//! └───────────┴──────────┴──────────┴──────────────────────┘
//! ```
//! Little endian. The header is followed in the same chunk by the first
//! bytes of the checkpoint payload.

use serde::{Deserialize, Serialize};

use crate::error::{RepError, Result};
use crate::storage::{names, CheckpointDescriptor, FileRegistry};
use crate::wal::{Lsn, SegmentDirectory};

const MAGIC: &[u8; 4] = b"BSMD";

/// Framing bytes in front of the body
pub const METADATA_FRAMING_SIZE: usize = 12;

/// One segment file as shipped during bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSegmentDescriptor {
    pub file_name: String,

    /// Position inside the file where shipped bytes begin
    pub file_offset: u64,

    /// Bytes shipped, starting at `file_offset`
    pub size: u64,
}

/// Everything a backup receives before live streaming starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapMetadata {
    pub checkpoint: CheckpointDescriptor,
    pub segments: Vec<LogSegmentDescriptor>,

    /// Durable end of the primary's log when the snapshot was taken;
    /// live streaming resumes here
    pub end_lsn: Lsn,
}

impl BootstrapMetadata {
    /// Describe the primary's durable state
    ///
    /// Lists every segment from the one holding the replay start up to the
    /// one holding `durable`. Must run under the log's flush lock so the
    /// file lengths read here agree with `durable`.
    pub fn prepare(
        segments: &SegmentDirectory,
        registry: &FileRegistry,
        checkpoint: Option<CheckpointDescriptor>,
        durable: Lsn,
    ) -> Result<Self> {
        let first = segments.first_segment().ok_or(RepError::MissingSegment(0))?;
        let checkpoint = checkpoint.unwrap_or_else(|| CheckpointDescriptor::empty(first.start_lsn()));
        let start = checkpoint.start_lsn;

        let mut listed = Vec::new();
        for segment in segments.all() {
            if segment.segnum < start.segment() || segment.segnum > durable.segment() {
                continue;
            }

            let file_name = segment.file_name();
            let data_end = if segment.segnum == durable.segment() {
                durable.offset()
            } else {
                let handle = registry.open_file(&file_name)?;
                let len = registry.len(handle);
                registry.close(handle);
                (segment.start_offset + len?).min(segment.end_offset)
            };

            let ship_from = if segment.segnum == start.segment() {
                start.offset()
            } else {
                segment.start_offset
            };

            listed.push(LogSegmentDescriptor {
                file_offset: segment.file_offset(ship_from),
                size: data_end.saturating_sub(ship_from),
                file_name,
            });
        }

        if listed.is_empty() {
            return Err(RepError::MissingSegment(start.offset()));
        }

        Ok(Self {
            checkpoint,
            segments: listed,
            end_lsn: durable,
        })
    }

    /// Exact encoded length
    pub fn size(&self) -> Result<usize> {
        Ok(METADATA_FRAMING_SIZE + bincode::serialized_size(self)? as usize)
    }

    /// Total payload bytes that follow the header
    pub fn payload_size(&self) -> u64 {
        self.checkpoint.size + self.segments.iter().map(|s| s.size).sum::<u64>()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(METADATA_FRAMING_SIZE + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a header from the front of `bytes`
    ///
    /// Returns the metadata and the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < METADATA_FRAMING_SIZE {
            return Err(RepError::Protocol(format!(
                "bootstrap header truncated: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(RepError::Protocol("bad bootstrap header magic".to_string()));
        }

        let body_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let total = METADATA_FRAMING_SIZE + body_len;
        if bytes.len() < total {
            return Err(RepError::ShortTransfer {
                expected: total as u64,
                actual: bytes.len() as u64,
            });
        }

        let body = &bytes[METADATA_FRAMING_SIZE..total];
        if crc32fast::hash(body) != crc {
            return Err(RepError::Protocol("bootstrap header checksum mismatch".to_string()));
        }

        let metadata = bincode::deserialize(body)?;
        Ok((metadata, total))
    }

    // =========================================================================
    // Backup-side markers
    // =========================================================================

    /// Write the checkpoint marker and one promise per promised file
    ///
    /// Runs before any payload byte is written. A promise holds the byte
    /// count the file will receive and is removed once the file is complete.
    pub fn persist_marker_files(&self, registry: &FileRegistry) -> Result<()> {
        if self.checkpoint.is_present() {
            let marker = registry.create_file(&self.checkpoint.marker_name())?;
            registry.sync(marker)?;
            registry.close(marker);
            write_promise(registry, &self.checkpoint.data_file_name(), self.checkpoint.size)?;
        }

        for segment in &self.segments {
            write_promise(registry, &segment.file_name, segment.size)?;
        }

        registry.sync_dir()
    }

    /// Drop the promise of a completely received file
    pub fn complete_promise(registry: &FileRegistry, file_name: &str) -> Result<()> {
        registry.remove(&names::promise_name(file_name))?;
        registry.sync_dir()
    }

    /// Promises left behind by an interrupted bootstrap: (file name, size)
    pub fn pending_promises(registry: &FileRegistry) -> Result<Vec<(String, u64)>> {
        let mut pending = Vec::new();
        for name in registry.list()? {
            let Some(file_name) = name.strip_suffix(names::PROMISE_SUFFIX) else {
                continue;
            };

            let handle = registry.open_file(&name)?;
            let mut raw = [0u8; 8];
            let read = registry.read_at(handle, 0, &mut raw)?;
            registry.close(handle);
            if read != raw.len() {
                return Err(RepError::LogCorruption(format!("promise {} is truncated", name)));
            }
            pending.push((file_name.to_string(), u64::from_le_bytes(raw)));
        }
        Ok(pending)
    }
}

fn write_promise(registry: &FileRegistry, file_name: &str, size: u64) -> Result<()> {
    let handle = registry.create_file(&names::promise_name(file_name))?;
    registry.truncate(handle, 0)?;
    registry.write_durable(handle, 0, &size.to_le_bytes())?;
    registry.close(handle);
    Ok(())
}
