//! AtlasRep Node Binary
//!
//! Runs a primary (ships its log to backups) or a backup (bootstraps from a
//! primary and follows its log).

use std::thread::JoinHandle;

use atlasrep::wal::LogRecord;
use atlasrep::{Config, Engine, ReplayStrategyKind, Result, Role};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasRep Node
#[derive(Parser, Debug)]
#[command(name = "atlasrep-node")]
#[command(about = "Log shipping primary or backup")]
#[command(version)]
struct Args {
    /// Node role: primary or backup
    #[arg(short, long)]
    role: Role,

    /// Log directory
    #[arg(short, long, default_value = "./atlasrep_log")]
    log_dir: String,

    /// Listen address (primary)
    #[arg(long, default_value = "127.0.0.1:7654")]
    listen: String,

    /// Primary address (backup)
    #[arg(long, default_value = "127.0.0.1:7654")]
    primary: String,

    /// Number of backups to wait for (primary)
    #[arg(short = 'n', long, default_value = "1")]
    backups: usize,

    /// Segment size in MB
    #[arg(long, default_value = "64")]
    segment_mb: u64,

    /// Transport buffer size in KB
    #[arg(long, default_value = "4096")]
    buffer_kb: usize,

    /// Recovery strategy: oid or offset
    #[arg(long, default_value = "oid")]
    replay: ReplayStrategyKind,

    /// Replay threads (both strategies)
    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    /// Wait for the backup's ack after every chunk (primary)
    #[arg(long)]
    sync_ship: bool,

    /// Persist shipped ranges without replaying them (backup)
    #[arg(long)]
    no_redo: bool,

    /// Commit this many demo records after backups connect (primary)
    #[arg(long, default_value = "0")]
    demo: u32,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasrep=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasRep Node v{}", atlasrep::VERSION);
    tracing::info!("Role: {:?}, log directory: {}", args.role, args.log_dir);

    let config = Config::builder()
        .log_dir(&args.log_dir)
        .listen_addr(&args.listen)
        .primary_addr(&args.primary)
        .num_backups(args.backups)
        .segment_size(args.segment_mb * 1024 * 1024)
        .transport_buffer_size(args.buffer_kb * 1024)
        .replay_strategy(args.replay)
        .oid_replay_threads(args.threads)
        .offset_replay_threads(args.threads)
        .ship_wait_persisted(args.sync_ship)
        .log_ship_sync_redo(!args.no_redo)
        .build();

    let result = match args.role {
        Role::Primary => run_primary(config, args.demo),
        Role::Backup => run_backup(config),
    };

    if let Err(e) = result {
        tracing::error!("Node failed: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Node stopped");
}

fn run_primary(config: Config, demo: u32) -> Result<()> {
    let backups = config.num_backups;
    let engine = Engine::open_primary(config)?;
    let server = engine.replication_server()?;

    tracing::info!("Waiting for {} backup(s) on {}", backups, server.local_addr()?);
    let shippers = server.accept_backups(backups)?;

    if demo > 0 {
        engine.commit(&[LogRecord::CreateTable {
            fid: 1,
            name: "demo".to_string(),
        }])?;
        for oid in 0..demo {
            engine.commit(&[LogRecord::Insert {
                fid: 1,
                oid,
                key: format!("key-{:08}", oid).into_bytes(),
                value: format!("value-{}", oid).into_bytes(),
            }])?;
        }
        tracing::info!("Committed {} demo records, durable end {}", demo, engine.durable_lsn());
        engine.close();
    }

    join_all(shippers)
}

fn run_backup(config: Config) -> Result<()> {
    let (engine, streaming) = Engine::connect_backup(config)?;
    tracing::info!("Following primary from {}", engine.durable_lsn());
    join_all(vec![streaming])
}

fn join_all(handles: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => {
                return Err(atlasrep::RepError::Protocol(
                    "replication thread panicked".to_string(),
                ))
            }
        }
    }
    Ok(())
}
