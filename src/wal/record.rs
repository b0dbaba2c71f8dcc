//! Log records and blocks
//!
//! Records are grouped into blocks, the unit of writing and scanning.
//! A block never spans two segments.
//!
//! ## Block Format
//! ```text
//! ┌────────────┬─────────────┬─────────────┬───────────┬─────────┬───────────┐
//! │ offset (8) │ segment (4) │ payload (4) │ count (4) │ CRC (4) │ records   │
//! └────────────┴─────────────┴─────────────┴───────────┴─────────┴───────────┘
//! ```
//! All integers are little endian; the CRC covers the bincode payload.

use serde::{Deserialize, Serialize};

use crate::error::{RepError, Result};

use super::lsn::{MAX_OFFSET, SEGMENT_BITS};
use super::Lsn;

/// Object identifier of a tuple
pub type Oid = u32;

/// Table (file) identifier
pub type Fid = u32;

/// Size of the fixed block header
pub const BLOCK_HEADER_SIZE: usize = 24;

/// Redo operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Register a table
    CreateTable { fid: Fid, name: String },

    /// Insert a new tuple and its primary key
    Insert {
        fid: Fid,
        oid: Oid,
        key: Vec<u8>,
        value: Vec<u8>,
    },

    /// New version of an existing tuple
    Update { fid: Fid, oid: Oid, value: Vec<u8> },

    /// Delete a tuple (tombstone version)
    Delete { fid: Fid, oid: Oid },

    /// Secondary index entry pointing at a tuple
    IndexInsert { fid: Fid, key: Vec<u8>, oid: Oid },

    /// Tuple's key changed
    UpdateKey { fid: Fid, oid: Oid, key: Vec<u8> },
}

impl LogRecord {
    pub fn fid(&self) -> Fid {
        match self {
            LogRecord::CreateTable { fid, .. }
            | LogRecord::Insert { fid, .. }
            | LogRecord::Update { fid, .. }
            | LogRecord::Delete { fid, .. }
            | LogRecord::IndexInsert { fid, .. }
            | LogRecord::UpdateKey { fid, .. } => *fid,
        }
    }

    /// Key used to assign the record to an OID partition
    ///
    /// Table records have no OID and are partitioned by FID.
    pub fn partition_key(&self) -> u32 {
        match self {
            LogRecord::CreateTable { fid, .. } => *fid,
            LogRecord::Insert { oid, .. }
            | LogRecord::Update { oid, .. }
            | LogRecord::Delete { oid, .. }
            | LogRecord::IndexInsert { oid, .. }
            | LogRecord::UpdateKey { oid, .. } => *oid,
        }
    }
}

/// A record together with its position in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub lsn: Lsn,
    pub record: LogRecord,
}

/// Fixed-size header in front of every block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub lsn: Lsn,
    pub payload_len: u32,
    pub record_count: u32,
    pub crc: u32,
}

impl BlockHeader {
    /// Total block length including the header
    pub fn block_len(&self) -> u64 {
        BLOCK_HEADER_SIZE as u64 + u64::from(self.payload_len)
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.lsn.offset().to_le_bytes());
        bytes[8..12].copy_from_slice(&self.lsn.segment().to_le_bytes());
        bytes[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.record_count.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(RepError::LogCorruption(format!(
                "incomplete block header: {} bytes",
                bytes.len()
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[0..8]);
        let offset = u64::from_le_bytes(raw);
        let segment = u32_at(8);
        if offset > MAX_OFFSET || segment >= 1 << SEGMENT_BITS {
            return Err(RepError::LogCorruption(format!(
                "block header names offset 0x{:x} in segment {}",
                offset, segment
            )));
        }

        Ok(Self {
            lsn: Lsn::make(offset, segment),
            payload_len: u32_at(12),
            record_count: u32_at(16),
            crc: u32_at(20),
        })
    }
}

/// Serialize `records` into a block starting at `lsn`
pub fn encode_block(lsn: Lsn, records: &[LogRecord]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(records)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);

    let header = BlockHeader {
        lsn,
        payload_len: payload.len() as u32,
        record_count: records.len() as u32,
        crc: hasher.finalize(),
    };

    let mut block = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
    block.extend_from_slice(&header.encode());
    block.extend_from_slice(&payload);
    Ok(block)
}

/// Verify and decode the payload that follows `header`
///
/// Records are numbered from the block's LSN: record `i` sits at
/// offset `block offset + i`, which keeps positions unique and ordered.
pub fn decode_block(header: &BlockHeader, payload: &[u8]) -> Result<Vec<ScannedRecord>> {
    if payload.len() != header.payload_len as usize {
        return Err(RepError::LogCorruption(format!(
            "block at {}: expected {} payload bytes, got {}",
            header.lsn,
            header.payload_len,
            payload.len()
        )));
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != header.crc {
        return Err(RepError::LogCorruption(format!(
            "block at {}: CRC mismatch",
            header.lsn
        )));
    }

    let records: Vec<LogRecord> = bincode::deserialize(payload)?;
    if records.len() != header.record_count as usize {
        return Err(RepError::LogCorruption(format!(
            "block at {}: header declares {} records, payload holds {}",
            header.lsn,
            header.record_count,
            records.len()
        )));
    }

    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, record)| ScannedRecord {
            lsn: header.lsn.advance(i as u64),
            record,
        })
        .collect())
}
