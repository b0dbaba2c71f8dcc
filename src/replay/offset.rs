//! Offset-partitioned replay
//!
//! The range is cut at block starts into up to N contiguous sub-ranges:
//!
//! ```text
//! [from ───── p1) [p1 ───── p2) [p2 ─────── to)
//!   worker 0        worker 1      worker 2
//! ```
//!
//! Cuts come from the split points attached to the range (for shipped
//! increments, the bounds table sent with the chunk). Without any, the
//! whole range goes to one worker.

use crate::error::Result;
use crate::wal::{LogScanner, Lsn};

use super::{handlers, worker_panicked, RedoTarget, Replay, ReplayRange, ReplayStats, WorkerStats};

/// Replay with up to `threads` workers over disjoint offset ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPartitioned {
    threads: usize,
}

impl OffsetPartitioned {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Cut `range` into contiguous sub-ranges at its split points
    ///
    /// Sub-range `i` starts at the first split point at or after
    /// `from + len * i / threads` that lies past the previous cut, so the
    /// pieces are roughly even in bytes and never empty.
    pub fn partition(&self, range: &ReplayRange) -> Vec<(Lsn, Lsn)> {
        let from = range.from.offset();
        let to = range.to.offset();
        if from >= to {
            return Vec::new();
        }

        let len = to - from;
        let mut cuts = vec![range.from];
        let mut hints = range.split_points.iter().copied().peekable();

        for i in 1..self.threads as u64 {
            let target = from + len * i / self.threads as u64;
            let last = cuts.last().map_or(from, |l| l.offset());
            while let Some(hint) = hints.peek() {
                if hint.offset() < target || hint.offset() <= last {
                    hints.next();
                } else {
                    break;
                }
            }
            match hints.next() {
                Some(hint) if hint.offset() < to => cuts.push(hint),
                _ => break,
            }
        }

        let mut ranges = Vec::with_capacity(cuts.len());
        for (i, start) in cuts.iter().enumerate() {
            let end = cuts.get(i + 1).copied().unwrap_or(range.to);
            ranges.push((*start, end));
        }
        ranges
    }

    fn run_worker(
        scanner: LogScanner<'_>,
        target: &dyn RedoTarget,
        from: Lsn,
        to: Lsn,
    ) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        let mut blocks = scanner.blocks(from, to.offset());

        for block in blocks.by_ref() {
            let block = block?;
            stats.blocks += 1;
            for scanned in &block.records {
                stats.scanned += 1;
                handlers::apply(target, scanned)?;
                stats.applied += 1;
            }
        }

        stats.reached = Some(blocks.position());
        Ok(stats)
    }
}

impl Replay for OffsetPartitioned {
    fn replay(
        &self,
        scanner: &LogScanner<'_>,
        target: &dyn RedoTarget,
        range: &ReplayRange,
    ) -> Result<ReplayStats> {
        let ranges = self.partition(range);
        if ranges.is_empty() {
            return Ok(ReplayStats::empty(range.from));
        }

        let scanner = *scanner;
        let results = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|&(from, to)| s.spawn(move |_| Self::run_worker(scanner, target, from, to)))
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(worker_panicked())))
                .collect::<Vec<_>>()
        })
        .map_err(|_| worker_panicked())?;

        let mut stats = ReplayStats::empty(range.to);
        stats.workers = ranges.len();
        let mut short = None;
        for (result, &(_, end)) in results.into_iter().zip(ranges.iter()) {
            let worker = result?;
            stats.blocks_scanned += worker.blocks;
            stats.records_scanned += worker.scanned;
            stats.records_applied += worker.applied;
            // The first sub-range that stopped early bounds what is complete
            if short.is_none() {
                if let Some(reached) = worker.reached {
                    if reached.offset() < end.offset() {
                        short = Some(reached);
                    }
                }
            }
        }
        if let Some(reached) = short {
            stats.reached = reached;
        }

        tracing::debug!(
            "Offset replay [{}, {}): {} records in {} sub-ranges, reached {}",
            range.from,
            range.to,
            stats.records_applied,
            stats.workers,
            stats.reached
        );
        Ok(stats)
    }
}
