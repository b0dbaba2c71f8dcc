//! Primary replication daemon
//!
//! One daemon per connected backup, on its own thread.
//!
//! ## Phases
//! ```text
//! bootstrap:   [header + ckpt] [ckpt] ... [seg k] [seg k] ... [seg n]
//! streaming:   ([bounds][chunk])  per chunk of every flushed piece
//! ```
//! Every chunk is preceded by a `ReadyToReceive` from the backup.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;

use crate::config::Config;
use crate::error::{RepError, Result};
use crate::protocol::{Condition, PartitionBounds};
use crate::storage::{CheckpointDescriptor, FileRegistry};
use crate::transport::{new_segment_imm, Channel};
use crate::wal::{FlushBatch, FlushPiece, LogManager, Lsn};

use super::BootstrapMetadata;

/// Ships one node's log to one backup
pub struct PrimaryDaemon {
    log: Arc<LogManager>,
    partitions: usize,
    wait_persisted: bool,
}

impl PrimaryDaemon {
    pub fn new(log: Arc<LogManager>, config: &Config) -> Self {
        Self {
            log,
            partitions: config.logbuf_partitions,
            wait_persisted: config.ship_wait_persisted,
        }
    }

    /// Run [`serve`](Self::serve) on a dedicated thread
    pub fn spawn<C>(self, channel: C) -> Result<JoinHandle<Result<()>>>
    where
        C: Channel + 'static,
    {
        let name = format!("ship-{}", channel.peer());
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut channel = channel;
                let result = self.serve(&mut channel);
                if let Err(e) = &result {
                    tracing::error!("Log shipping to {} stopped: {}", channel.peer(), e);
                }
                result
            })
            .map_err(RepError::Io)
    }

    /// Bootstrap the backup, then forward every flush until the log goes away
    pub fn serve<C: Channel>(&self, channel: &mut C) -> Result<()> {
        let (flushes, metadata) = self.log.subscribe(|durable| {
            let registry = self.log.registry();
            let checkpoint = CheckpointDescriptor::discover(registry, self.log.segments())?;
            BootstrapMetadata::prepare(self.log.segments(), registry, checkpoint, durable)
        })?;

        self.bootstrap(channel, &metadata)?;
        tracing::info!(
            "Backup {} bootstrapped up to {}, streaming",
            channel.peer(),
            metadata.end_lsn
        );

        self.stream(channel, &flushes, metadata.end_lsn)
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Send the header, the checkpoint payload and the listed segments
    pub fn bootstrap<C: Channel>(&self, channel: &mut C, metadata: &BootstrapMetadata) -> Result<()> {
        let capacity = channel.capacity();
        let header = metadata.encode()?;
        if header.len() > capacity {
            return Err(RepError::HeaderTooLarge {
                size: header.len(),
                capacity,
            });
        }

        tracing::info!(
            "Bootstrapping {}: checkpoint {} bytes, {} segments, {} bytes total",
            channel.peer(),
            metadata.checkpoint.size,
            metadata.segments.len(),
            metadata.payload_size()
        );

        let registry = self.log.registry();
        let mut buf = vec![0u8; capacity];

        // Step 1: header plus the first checkpoint bytes in one chunk
        let checkpoint = &metadata.checkpoint;
        let mut sent = 0u64;
        let first = (capacity - header.len()).min(checkpoint.size as usize);
        buf[..header.len()].copy_from_slice(&header);
        if first > 0 {
            read_exact_at(
                registry,
                &checkpoint.data_file_name(),
                0,
                &mut buf[header.len()..header.len() + first],
            )?;
            sent = first as u64;
        }
        let len = header.len() + first;
        channel.wait(Condition::ReadyToReceive)?;
        channel.write_imm(&buf[..len], len as u32)?;

        // Step 2: rest of the checkpoint
        if sent < checkpoint.size {
            ship_file(
                channel,
                registry,
                &checkpoint.data_file_name(),
                sent,
                checkpoint.size - sent,
                &mut buf,
            )?;
        }

        // Step 3: segments in log order
        for segment in &metadata.segments {
            ship_file(
                channel,
                registry,
                &segment.file_name,
                segment.file_offset,
                segment.size,
                &mut buf,
            )?;
            tracing::debug!("Shipped {} ({} bytes)", segment.file_name, segment.size);
        }
        Ok(())
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Forward flushed ranges past `shipped` until the log manager drops the
    /// subscription
    pub fn stream<C: Channel>(
        &self,
        channel: &mut C,
        flushes: &Receiver<Arc<FlushBatch>>,
        mut shipped: Lsn,
    ) -> Result<()> {
        for batch in flushes.iter() {
            for piece in &batch.pieces {
                shipped = self.ship_piece(channel, piece, &batch.block_starts, shipped)?;
            }
        }
        tracing::info!("Log closed, stopped shipping to {}", channel.peer());
        Ok(())
    }

    fn ship_piece<C: Channel>(
        &self,
        channel: &mut C,
        piece: &FlushPiece,
        block_starts: &[Lsn],
        shipped: Lsn,
    ) -> Result<Lsn> {
        let end = piece.end();
        if end.offset() <= shipped.offset() {
            return Ok(shipped);
        }

        // Bytes the bootstrap already covered
        let skip = shipped.offset().saturating_sub(piece.start.offset()) as usize;
        let capacity = channel.capacity();
        let mut pos = skip;

        while pos < piece.bytes.len() {
            let len = capacity.min(piece.bytes.len() - pos);
            let chunk_start = piece.start.advance(pos as u64);
            let chunk_end = chunk_start.advance(len as u64);

            let imm = match piece.new_segment {
                Some(delta) if pos == 0 => new_segment_imm(delta)?,
                _ => 0,
            };

            let starts: Vec<Lsn> = block_starts
                .iter()
                .copied()
                .filter(|b| {
                    b.segment() == chunk_start.segment()
                        && b.offset() >= chunk_start.offset()
                        && b.offset() < chunk_end.offset()
                })
                .collect();
            let bounds = PartitionBounds::from_block_starts(&starts, chunk_end, self.partitions);

            channel.wait(Condition::ReadyToReceive)?;
            channel.write_bounds(&bounds)?;
            channel.write_imm(&piece.bytes[pos..pos + len], imm)?;
            tracing::trace!(
                "Shipped [{}, {}) to {} imm=0x{:08x}",
                chunk_start,
                chunk_end,
                channel.peer(),
                imm
            );

            if self.wait_persisted {
                channel.wait(Condition::Persisted)?;
            }
            pos += len;
        }

        Ok(end)
    }
}

/// Ship `size` bytes of a file starting at `offset`, one chunk per round
fn ship_file<C: Channel>(
    channel: &mut C,
    registry: &FileRegistry,
    name: &str,
    offset: u64,
    size: u64,
    buf: &mut [u8],
) -> Result<()> {
    let mut done = 0u64;
    while done < size {
        let len = (buf.len() as u64).min(size - done) as usize;
        read_exact_at(registry, name, offset + done, &mut buf[..len])?;
        channel.wait(Condition::ReadyToReceive)?;
        channel.write_imm(&buf[..len], len as u32)?;
        done += len as u64;
    }
    Ok(())
}

fn read_exact_at(registry: &FileRegistry, name: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
    let handle = registry.open_file(name)?;
    let read = registry.read_at(handle, offset, buf);
    registry.close(handle);
    let read = read?;
    if read != buf.len() {
        return Err(RepError::ShortTransfer {
            expected: buf.len() as u64,
            actual: read as u64,
        });
    }
    Ok(())
}
