//! Log Scanner
//!
//! Reads blocks and records between two log positions, walking across
//! segment files.
//!
//! A scan stops (without error) at the first block that is not fully
//! inside both the requested range and the bytes already on disk. The
//! position it stopped at is available from [`BlockIter::position`], so a
//! caller replaying a partially shipped range knows where to resume.

use std::collections::VecDeque;

use crate::error::{RepError, Result};
use crate::storage::{FileHandle, FileRegistry};

use super::record::{decode_block, BlockHeader, ScannedRecord, BLOCK_HEADER_SIZE};
use super::{Lsn, SegmentDirectory, SegmentId};

/// Scans log blocks out of segment files
#[derive(Clone, Copy)]
pub struct LogScanner<'a> {
    segments: &'a SegmentDirectory,
    registry: &'a FileRegistry,
}

/// A decoded block
#[derive(Debug)]
pub struct ScannedBlock {
    pub header: BlockHeader,
    pub records: Vec<ScannedRecord>,
}

/// Totals reported by [`LogScanner::verify`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub blocks: u64,
    pub records: u64,
    pub end: Option<Lsn>,
}

impl<'a> LogScanner<'a> {
    pub fn new(segments: &'a SegmentDirectory, registry: &'a FileRegistry) -> Self {
        Self { segments, registry }
    }

    /// Blocks starting at `from` and ending at or before offset `to`
    pub fn blocks(&self, from: Lsn, to: u64) -> BlockIter<'a> {
        BlockIter {
            scanner: *self,
            position: from,
            to,
            done: false,
            open: None,
        }
    }

    /// Records of all blocks in `[from, to)`
    pub fn records(&self, from: Lsn, to: u64) -> RecordIter<'a> {
        RecordIter {
            blocks: self.blocks(from, to),
            pending: VecDeque::new(),
        }
    }

    /// Start positions of every block in `[from, to)`
    pub fn block_starts(&self, from: Lsn, to: u64) -> Result<Vec<Lsn>> {
        self.blocks(from, to)
            .map(|block| block.map(|b| b.header.lsn))
            .collect()
    }

    /// Walk `[from, to)` checking every block
    pub fn verify(&self, from: Lsn, to: u64) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut blocks = self.blocks(from, to);
        for block in blocks.by_ref() {
            let block = block?;
            summary.blocks += 1;
            summary.records += block.records.len() as u64;
        }
        summary.end = Some(blocks.position());
        Ok(summary)
    }
}

/// Iterator over blocks; see [`LogScanner::blocks`]
pub struct BlockIter<'a> {
    scanner: LogScanner<'a>,
    position: Lsn,
    to: u64,
    done: bool,
    /// Segment file currently held open: (segment number, handle)
    open: Option<(u32, FileHandle)>,
}

impl<'a> BlockIter<'a> {
    /// Where the next block would start
    pub fn position(&self) -> Lsn {
        self.position
    }

    fn read_next(&mut self) -> Result<Option<ScannedBlock>> {
        loop {
            if self.position.offset() >= self.to {
                return Ok(None);
            }

            let segment = self
                .scanner
                .segments
                .get_segment(self.position.segment())
                .filter(|s| self.position.offset() >= s.start_offset)
                .ok_or(RepError::MissingSegment(self.position.offset()))?;

            let handle = self.handle_for(&segment)?;
            match self.read_in_segment(&segment, handle)? {
                Step::Block(block) => {
                    self.position = self.position.advance(block.header.block_len());
                    return Ok(Some(block));
                }
                // Past the data of this segment: continue in the next one if it exists
                Step::NextSegment => match self.scanner.segments.get_segment(segment.segnum + 1) {
                    Some(next) => self.position = next.start_lsn(),
                    None => return Ok(None),
                },
                Step::Stop => return Ok(None),
            }
        }
    }

    fn handle_for(&mut self, segment: &SegmentId) -> Result<FileHandle> {
        if let Some((segnum, handle)) = self.open {
            if segnum == segment.segnum {
                return Ok(handle);
            }
        }
        self.release();
        let handle = self.scanner.registry.open_file(&segment.file_name())?;
        self.open = Some((segment.segnum, handle));
        Ok(handle)
    }

    fn release(&mut self) {
        if let Some((_, handle)) = self.open.take() {
            self.scanner.registry.close(handle);
        }
    }

    fn read_in_segment(&self, segment: &SegmentId, handle: FileHandle) -> Result<Step> {
        let registry = self.scanner.registry;
        let file_len = registry.len(handle)?;
        let data_end = (segment.start_offset + file_len).min(segment.end_offset);

        if self.position.offset() >= data_end {
            return Ok(Step::NextSegment);
        }
        if data_end - self.position.offset() < BLOCK_HEADER_SIZE as u64 {
            return Ok(Step::Stop);
        }

        let file_offset = segment.file_offset(self.position.offset());
        let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
        registry.read_at(handle, file_offset, &mut header_bytes)?;
        let header = BlockHeader::decode(&header_bytes)?;

        if header.lsn != self.position {
            return Err(RepError::LogCorruption(format!(
                "expected block at {}, found header for {}",
                self.position, header.lsn
            )));
        }

        let block_end = self.position.offset() + header.block_len();
        if block_end > data_end || block_end > self.to {
            return Ok(Step::Stop);
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        let read = registry.read_at(handle, file_offset + BLOCK_HEADER_SIZE as u64, &mut payload)?;
        if read != payload.len() {
            return Err(RepError::ShortTransfer {
                expected: payload.len() as u64,
                actual: read as u64,
            });
        }

        let records = decode_block(&header, &payload)?;
        Ok(Step::Block(ScannedBlock { header, records }))
    }
}

impl<'a> Drop for BlockIter<'a> {
    fn drop(&mut self) {
        self.release();
    }
}

enum Step {
    Block(ScannedBlock),
    NextSegment,
    Stop,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<ScannedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over records; see [`LogScanner::records`]
pub struct RecordIter<'a> {
    blocks: BlockIter<'a>,
    pending: VecDeque<ScannedRecord>,
}

impl<'a> RecordIter<'a> {
    /// Where the block after the last fully returned one starts
    pub fn position(&self) -> Lsn {
        self.blocks.position()
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            match self.blocks.next()? {
                Ok(block) => self.pending.extend(block.records),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
