//! Checkpoint descriptors
//!
//! Checkpoint payloads are produced elsewhere; this module only finds the
//! latest durable one and describes it for shipping.

use serde::{Deserialize, Serialize};

use crate::error::{RepError, Result};
use crate::wal::{Lsn, SegmentDirectory};

use super::names;
use super::FileRegistry;

/// A durable checkpoint: replay resumes at `start_lsn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    /// First LSN not covered by the checkpoint
    pub start_lsn: Lsn,

    /// Log offset at which the checkpoint finished
    pub end_offset: u64,

    /// Payload size in bytes
    pub size: u64,
}

impl CheckpointDescriptor {
    /// Descriptor for a log with no checkpoint: replay from `log_start`
    pub fn empty(log_start: Lsn) -> Self {
        Self {
            start_lsn: log_start,
            end_offset: log_start.offset(),
            size: 0,
        }
    }

    /// Whether a checkpoint payload exists
    pub fn is_present(&self) -> bool {
        self.size > 0
    }

    pub fn marker_name(&self) -> String {
        names::checkpoint_marker_name(self.start_lsn.offset(), self.end_offset)
    }

    pub fn data_file_name(&self) -> String {
        names::checkpoint_data_name(self.start_lsn.offset())
    }

    /// Find the newest checkpoint in the registry's directory
    ///
    /// A marker without its data file means a checkpoint was torn and is
    /// reported as corruption.
    pub fn discover(
        registry: &FileRegistry,
        segments: &SegmentDirectory,
    ) -> Result<Option<CheckpointDescriptor>> {
        let latest = registry
            .list()?
            .iter()
            .filter(|name| names::is_checkpoint_marker_name(name))
            .map(|name| names::parse_checkpoint_marker_name(name))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max();

        let Some((start_offset, end_offset)) = latest else {
            return Ok(None);
        };

        let data_name = names::checkpoint_data_name(start_offset);
        let handle = registry.open_file(&data_name).map_err(|_| {
            RepError::LogCorruption(format!(
                "checkpoint marker at 0x{:x} has no data file {}",
                start_offset, data_name
            ))
        })?;
        let size = registry.len(handle)?;
        registry.close(handle);

        let segment = segments.get_offset_segment(start_offset)?;
        Ok(Some(CheckpointDescriptor {
            start_lsn: Lsn::make(start_offset, segment.segnum),
            end_offset,
            size,
        }))
    }

    /// Publish a checkpoint payload: data file first, marker last
    pub fn install(
        registry: &FileRegistry,
        start_lsn: Lsn,
        end_offset: u64,
        payload: &[u8],
    ) -> Result<CheckpointDescriptor> {
        let descriptor = CheckpointDescriptor {
            start_lsn,
            end_offset,
            size: payload.len() as u64,
        };

        let data = registry.create_file(&descriptor.data_file_name())?;
        registry.truncate(data, 0)?;
        registry.write_durable(data, 0, payload)?;
        registry.close(data);

        let marker = registry.create_file(&descriptor.marker_name())?;
        registry.sync(marker)?;
        registry.close(marker);
        registry.sync_dir()?;

        tracing::info!(
            "Installed checkpoint {} ({} bytes)",
            descriptor.marker_name(),
            descriptor.size
        );
        Ok(descriptor)
    }
}
