//! Storage Module
//!
//! File-level persistence shared by the log writer, the backup daemon and
//! the checkpoint code.
//!
//! ## Responsibilities
//! - Own open files behind small integer handles (no ambient global maps)
//! - Durable positional writes, reads, truncate and sync
//! - Fixed textual file-name formats for segments and checkpoints
//! - Locate the latest durable checkpoint

mod checkpoint;
pub mod names;
mod registry;

pub use checkpoint::CheckpointDescriptor;
pub use registry::{FileHandle, FileRegistry};
