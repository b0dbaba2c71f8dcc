//! Frame definitions
//!
//! The three kinds of traffic a replication channel carries.

use crate::wal::Lsn;

/// Number of entries in the partition-bounds table
pub const MAX_LOGBUF_PARTITIONS: usize = 64;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Signal = 0x01,
    Bounds = 0x02,
    Data = 0x03,
}

/// Named conditions a peer can signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    /// Receiver's buffer is free for the next chunk
    ReadyToReceive = 0x01,

    /// Receiver made the last chunk durable
    Persisted = 0x02,
}

impl Condition {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Condition::ReadyToReceive),
            0x02 => Some(Condition::Persisted),
            _ => None,
        }
    }
}

/// How the primary's flushed range is sliced into replay partitions
///
/// Entry `i` is the packed end LSN of partition `i`; unused entries are 0
/// (segment numbers start at 1, so no real LSN packs to 0). Every entry
/// sits on a block boundary.
#[derive(Clone, PartialEq, Eq)]
pub struct PartitionBounds(pub [u64; MAX_LOGBUF_PARTITIONS]);

impl PartitionBounds {
    pub fn empty() -> Self {
        PartitionBounds([0; MAX_LOGBUF_PARTITIONS])
    }

    /// Slice `[block_starts[0], end)` into at most `partitions` pieces whose
    /// ends fall on block starts (or on `end`)
    pub fn from_block_starts(block_starts: &[Lsn], end: Lsn, partitions: usize) -> Self {
        let mut bounds = Self::empty();
        let Some(first) = block_starts.first() else {
            return bounds;
        };
        let partitions = partitions.clamp(1, MAX_LOGBUF_PARTITIONS);
        let total = end.offset().saturating_sub(first.offset());

        let mut slot = 0;
        let mut last = first.offset();
        for i in 1..partitions as u64 {
            let target = first.offset() + total * i / partitions as u64;
            if let Some(lsn) = block_starts
                .iter()
                .find(|b| b.offset() >= target && b.offset() > last)
            {
                if lsn.offset() >= end.offset() {
                    break;
                }
                bounds.0[slot] = lsn.to_u64();
                last = lsn.offset();
                slot += 1;
            }
        }
        bounds.0[slot] = end.to_u64();
        bounds
    }

    /// Non-empty entries in order
    pub fn entries(&self) -> impl Iterator<Item = Lsn> + '_ {
        self.0
            .iter()
            .take_while(|raw| **raw != 0)
            .map(|raw| Lsn::from_u64(*raw))
    }

    /// Entries strictly inside `(from, to)`, usable as replay split points
    pub fn split_points(&self, from: Lsn, to: Lsn) -> Vec<Lsn> {
        self.entries()
            .filter(|lsn| lsn.offset() > from.offset() && lsn.offset() < to.offset())
            .collect()
    }
}

impl std::fmt::Debug for PartitionBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

/// A frame on the replication channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A condition signal
    Signal(Condition),

    /// The partition-bounds table
    Bounds(PartitionBounds),

    /// A chunk of bytes plus its immediate value
    Data { imm: u32, payload: Vec<u8> },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Signal(_) => FrameType::Signal,
            Frame::Bounds(_) => FrameType::Bounds,
            Frame::Data { .. } => FrameType::Data,
        }
    }
}
