//! Network Module
//!
//! TCP transport for replication.
//!
//! ## Architecture
//! - Primary: one listener, one shipping thread per accepted backup
//! - Backup: one outgoing connection to the primary
//! - Frames as defined in [`crate::protocol`]

mod connection;
mod server;

pub use connection::TcpLink;
pub use server::ReplicationServer;
