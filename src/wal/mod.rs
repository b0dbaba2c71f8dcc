//! Write-Ahead Log (WAL) Module
//!
//! The segmented log shared by primary and backups.
//!
//! ## Responsibilities
//! - LSNs: packed (offset, segment) positions
//! - Segment directory: segment number → offset range
//! - Blocks of redo records with CRC32 checksums
//! - Append/flush on the primary, persistence of shipped bytes on backups
//! - Scanning blocks and records across segment files
//!
//! ## Segment File Format
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Block 1                                              │
//! │ ┌────────┬───────┬─────────┬───────┬───────┬───────┐ │
//! │ │ Off(8) │Seg(4) │PayLen(4)│Cnt(4) │CRC(4) │Records│ │
//! │ └────────┴───────┴─────────┴───────┴───────┴───────┘ │
//! ├──────────────────────────────────────────────────────┤
//! │ Block 2 ...                                          │
//! └──────────────────────────────────────────────────────┘
//! ```
//! Blocks never span segments. Record `i` of a block sits at the block's
//! LSN advanced by `i`.

mod lsn;
mod reader;
mod record;
mod segment;
mod writer;

pub use lsn::{Lsn, MAX_OFFSET, SEGMENT_BITS};
pub use reader::{BlockIter, LogScanner, RecordIter, ScanSummary, ScannedBlock};
pub use record::{
    decode_block, encode_block, BlockHeader, Fid, LogRecord, Oid, ScannedRecord,
    BLOCK_HEADER_SIZE,
};
pub use segment::{SegmentDirectory, SegmentId};
pub use writer::{FlushBatch, FlushPiece, LogManager};
