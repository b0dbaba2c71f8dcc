//! Replication listener
//!
//! Accepts backup connections on the primary and hands each one to its
//! own [`PrimaryDaemon`] thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Config;
use crate::error::{RepError, Result};
use crate::replication::PrimaryDaemon;
use crate::wal::LogManager;

use super::TcpLink;

/// TCP listener for backups
pub struct ReplicationServer {
    config: Config,
    log: Arc<LogManager>,
    listener: TcpListener,
}

impl ReplicationServer {
    /// Bind `config.listen_addr`
    pub fn bind(config: Config, log: Arc<LogManager>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            RepError::Network(format!("failed to bind {}: {}", config.listen_addr, e))
        })?;
        tracing::info!("Replication listener on {}", config.listen_addr);
        Ok(Self {
            config,
            log,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one backup and start shipping to it
    pub fn accept_backup(&self) -> Result<JoinHandle<Result<()>>> {
        let (stream, addr) = self.listener.accept()?;
        tracing::info!("Backup connected from {}", addr);

        let endpoint = TcpLink::new(stream)?.into_endpoint(&self.config)?;
        PrimaryDaemon::new(Arc::clone(&self.log), &self.config).spawn(endpoint)
    }

    /// Accept `count` backups; returns their shipping threads
    pub fn accept_backups(&self, count: usize) -> Result<Vec<JoinHandle<Result<()>>>> {
        (0..count).map(|_| self.accept_backup()).collect()
    }
}
