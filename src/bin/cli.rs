//! AtlasRep CLI
//!
//! Offline inspection of a log directory.

use std::path::PathBuf;
use std::sync::Arc;

use atlasrep::replication::BootstrapMetadata;
use atlasrep::storage::{CheckpointDescriptor, FileRegistry};
use atlasrep::wal::{LogManager, Lsn};
use atlasrep::Result;
use clap::{Parser, Subcommand};

/// AtlasRep CLI
#[derive(Parser, Debug)]
#[command(name = "atlasrep-cli")]
#[command(about = "Inspect an AtlasRep log directory")]
struct Args {
    /// Log directory
    #[arg(short, long, default_value = "./atlasrep_log")]
    log_dir: PathBuf,

    /// Segment size in MB the log was written with
    #[arg(long, default_value = "64")]
    segment_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List segments and the checkpoint
    Segments,

    /// Check every block from the replay start to the durable end
    Verify,

    /// List promises left by an interrupted bootstrap
    Promises,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let registry = Arc::new(FileRegistry::open(&args.log_dir)?);

    if let Commands::Promises = args.command {
        let pending = BootstrapMetadata::pending_promises(&registry)?;
        if pending.is_empty() {
            println!("no pending promises");
        }
        for (name, size) in pending {
            println!("{}  {} bytes promised", name, size);
        }
        return Ok(());
    }

    let log = LogManager::with_registry(Arc::clone(&registry), args.segment_mb * 1024 * 1024)?;
    let checkpoint = CheckpointDescriptor::discover(&registry, log.segments())?;

    match args.command {
        Commands::Segments => {
            for segment in log.segments().all() {
                println!(
                    "{:>6}  [0x{:012x}, 0x{:012x})  {}",
                    segment.segnum,
                    segment.start_offset,
                    segment.end_offset,
                    segment.file_name()
                );
            }
            match checkpoint {
                Some(c) => println!("checkpoint at {} ({} bytes)", c.start_lsn, c.size),
                None => println!("no checkpoint"),
            }
            println!("durable end {}", log.durable_lsn());
        }
        Commands::Verify => {
            let from: Lsn = match checkpoint {
                Some(c) => c.start_lsn,
                None => log.start_lsn()?,
            };
            let to = log.durable_lsn();
            let summary = log.scanner().verify(from, to.offset())?;
            println!(
                "{} blocks, {} records in [{}, {})",
                summary.blocks, summary.records, from, to
            );
            if let Some(end) = summary.end {
                if end.offset() < to.offset() {
                    println!("incomplete tail: last full block ends at {}", end);
                }
            }
        }
        Commands::Promises => {}
    }
    Ok(())
}
