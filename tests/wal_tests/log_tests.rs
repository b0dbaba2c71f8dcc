//! Tests for the log manager and scanner
//!
//! These tests verify:
//! - Append/flush and durable LSN tracking
//! - Segment rolling (blocks never span segments)
//! - Scanning blocks and records across segments
//! - Reopen after restart, cutting a torn tail left by a crash
//! - Backup-side persistence of shipped bytes
//! - Flush subscriptions
//! - Block checksum verification

use std::sync::Arc;

use atlasrep::storage::FileRegistry;
use atlasrep::wal::{
    decode_block, encode_block, BlockHeader, LogManager, LogRecord, Lsn, BLOCK_HEADER_SIZE,
};
use atlasrep::{Config, RepError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log(segment_size: u64) -> (TempDir, LogManager) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(segment_size)
        .build();
    let log = LogManager::open(&config).unwrap();
    (temp_dir, log)
}

fn insert(oid: u32, value_len: usize) -> LogRecord {
    LogRecord::Insert {
        fid: 1,
        oid,
        key: format!("k{}", oid).into_bytes(),
        value: vec![oid as u8; value_len],
    }
}

// =============================================================================
// Append / Flush Tests
// =============================================================================

#[test]
fn test_fresh_log_has_first_segment() {
    let (_temp, log) = setup_temp_log(4096);
    let first = log.segments().first_segment().unwrap();
    assert_eq!(first.segnum, 1);
    assert_eq!(first.start_offset, 0);
    assert_eq!(log.durable_lsn(), Lsn::make(0, 1));
}

#[test]
fn test_append_then_flush() {
    let (_temp, log) = setup_temp_log(4096);

    let lsn = log.append(&[insert(1, 10)]).unwrap();
    assert_eq!(lsn, Lsn::make(0, 1));
    // Not durable until flushed
    assert_eq!(log.durable_lsn(), Lsn::make(0, 1));
    assert!(log.tail_lsn() > lsn);

    let durable = log.flush().unwrap();
    assert_eq!(durable, log.tail_lsn());
    assert_eq!(log.durable_lsn(), durable);
}

#[test]
fn test_flush_without_pending_is_noop() {
    let (_temp, log) = setup_temp_log(4096);
    let before = log.durable_lsn();
    assert_eq!(log.flush().unwrap(), before);
}

#[test]
fn test_blocks_never_span_segments() {
    let (_temp, log) = setup_temp_log(512);

    let mut lsns = Vec::new();
    for oid in 0..20 {
        lsns.push(log.append(&[insert(oid, 60)]).unwrap());
    }
    log.flush().unwrap();
    assert!(log.segments().len() > 1);

    let blocks: Vec<_> = log
        .scanner()
        .blocks(log.start_lsn().unwrap(), log.durable_lsn().offset())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(blocks.len(), 20);

    for block in &blocks {
        let seg = log.segments().segment_of(block.header.lsn).unwrap();
        assert!(block.header.lsn.offset() + block.header.block_len() <= seg.end_offset);
    }
    assert_eq!(
        blocks.iter().map(|b| b.header.lsn).collect::<Vec<_>>(),
        lsns
    );
}

#[test]
fn test_new_segment_starts_at_previous_end() {
    let (_temp, log) = setup_temp_log(512);
    for oid in 0..20 {
        log.append(&[insert(oid, 60)]).unwrap();
    }
    log.flush().unwrap();

    let all = log.segments().all();
    for pair in all.windows(2) {
        assert_eq!(pair[1].segnum, pair[0].segnum + 1);
        assert_eq!(pair[1].start_offset, pair[0].end_offset);
    }
}

#[test]
fn test_oversized_block_rejected() {
    let (_temp, log) = setup_temp_log(256);
    let err = log.append(&[insert(1, 1024)]).unwrap_err();
    assert!(matches!(err, RepError::Config(_)));
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_record_lsns_follow_block_lsn() {
    let (_temp, log) = setup_temp_log(4096);
    let block = log.append(&[insert(1, 4), insert(2, 4), insert(3, 4)]).unwrap();
    log.flush().unwrap();

    let records: Vec<_> = log
        .scanner()
        .records(block, log.durable_lsn().offset())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records.len(), 3);
    for (i, scanned) in records.iter().enumerate() {
        assert_eq!(scanned.lsn, block.advance(i as u64));
    }
}

#[test]
fn test_scan_stops_at_range_end_inside_block() {
    let (_temp, log) = setup_temp_log(4096);
    let first = log.append(&[insert(1, 10)]).unwrap();
    let second = log.append(&[insert(2, 10)]).unwrap();
    log.flush().unwrap();

    // End falls in the middle of the second block
    let mut blocks = log.scanner().blocks(first, second.offset() + 5);
    assert!(blocks.next().unwrap().is_ok());
    assert!(blocks.next().is_none());
    assert_eq!(blocks.position(), second);
}

#[test]
fn test_verify_summary() {
    let (_temp, log) = setup_temp_log(512);
    for oid in 0..10 {
        log.append(&[insert(oid, 30), insert(oid + 100, 30)]).unwrap();
    }
    log.flush().unwrap();

    let summary = log
        .scanner()
        .verify(log.start_lsn().unwrap(), log.durable_lsn().offset())
        .unwrap();
    assert_eq!(summary.blocks, 10);
    assert_eq!(summary.records, 20);
    assert_eq!(summary.end.unwrap().offset(), log.durable_lsn().offset());
}

#[test]
fn test_block_starts() {
    let (_temp, log) = setup_temp_log(4096);
    let a = log.append(&[insert(1, 10)]).unwrap();
    let b = log.append(&[insert(2, 10)]).unwrap();
    log.flush().unwrap();

    let starts = log
        .scanner()
        .block_starts(a, log.durable_lsn().offset())
        .unwrap();
    assert_eq!(starts, vec![a, b]);
}

// =============================================================================
// Restart Tests
// =============================================================================

#[test]
fn test_reopen_recovers_segments_and_durable_end() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(512)
        .build();

    let (durable, segments) = {
        let log = LogManager::open(&config).unwrap();
        for oid in 0..20 {
            log.append(&[insert(oid, 60)]).unwrap();
        }
        (log.flush().unwrap(), log.segments().len())
    };

    let log = LogManager::open(&config).unwrap();
    assert_eq!(log.durable_lsn(), durable);
    assert_eq!(log.segments().len(), segments);

    // Appends continue where the previous run stopped
    let next = log.append(&[insert(99, 4)]).unwrap();
    assert!(next >= durable);
    log.flush().unwrap();

    let summary = log
        .scanner()
        .verify(log.start_lsn().unwrap(), log.durable_lsn().offset())
        .unwrap();
    assert_eq!(summary.blocks, 21);
}

/// Append raw bytes to the end of the last segment file, as a crash in the
/// middle of a flush would leave them
fn append_to_last_segment(temp_dir: &TempDir, log: &LogManager, bytes: &[u8]) {
    use std::io::Write;

    let segment = log.segments().last_segment().unwrap();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(temp_dir.path().join(segment.file_name()))
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn test_reopen_cuts_garbage_tail() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(4096)
        .build();

    let durable = {
        let log = LogManager::open(&config).unwrap();
        for oid in 0..3 {
            log.append(&[insert(oid, 20)]).unwrap();
        }
        let durable = log.flush().unwrap();
        append_to_last_segment(&temp_dir, &log, &[0xAB; 10]);
        durable
    };

    {
        let log = LogManager::open(&config).unwrap();
        assert_eq!(log.durable_lsn(), durable);
        let segment = log.segments().last_segment().unwrap();
        let len = std::fs::metadata(temp_dir.path().join(segment.file_name()))
            .unwrap()
            .len();
        assert_eq!(len, durable.offset());

        log.append(&[insert(3, 20)]).unwrap();
        log.flush().unwrap();
    }

    // A second restart sees four intact blocks
    let log = LogManager::open(&config).unwrap();
    let summary = log
        .scanner()
        .verify(log.start_lsn().unwrap(), log.durable_lsn().offset())
        .unwrap();
    assert_eq!(summary.blocks, 4);
    assert_eq!(summary.end, Some(log.durable_lsn()));
}

#[test]
fn test_reopen_cuts_half_written_block() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(4096)
        .build();

    let durable = {
        let log = LogManager::open(&config).unwrap();
        log.append(&[insert(1, 40)]).unwrap();
        let durable = log.flush().unwrap();

        let torn = encode_block(durable, &[insert(2, 40)]).unwrap();
        append_to_last_segment(&temp_dir, &log, &torn[..torn.len() / 2]);
        durable
    };

    let log = LogManager::open(&config).unwrap();
    assert_eq!(log.durable_lsn(), durable);
    assert_eq!(log.tail_lsn(), durable);
    let next = log.append(&[insert(3, 40)]).unwrap();
    assert_eq!(next, durable);
}

#[test]
fn test_reopen_keeps_complete_tail() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(512)
        .build();

    let durable = {
        let log = LogManager::open(&config).unwrap();
        for oid in 0..12 {
            log.append(&[insert(oid, 60)]).unwrap();
        }
        log.flush().unwrap()
    };

    let log = LogManager::open(&config).unwrap();
    assert_eq!(log.durable_lsn(), durable);
}

// =============================================================================
// Backup Persistence Tests
// =============================================================================

#[test]
fn test_persist_shipped_bytes() {
    let (_primary_dir, primary) = setup_temp_log(4096);
    let block = primary.append(&[insert(7, 16)]).unwrap();
    primary.flush().unwrap();
    let bytes = encode_block(block, &[insert(7, 16)]).unwrap();

    let (_backup_dir, backup) = setup_temp_log(4096);
    let end = backup.persist_shipped(block, &bytes).unwrap();
    assert_eq!(end, primary.durable_lsn());
    assert_eq!(backup.durable_lsn(), end);

    let records: Vec<_> = backup
        .scanner()
        .records(block, end.offset())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records[0].record, insert(7, 16));
}

#[test]
fn test_persist_shipped_overrun_rejected() {
    let (_temp, log) = setup_temp_log(256);
    let err = log.persist_shipped(Lsn::make(200, 1), &[0u8; 100]).unwrap_err();
    assert!(matches!(err, RepError::Protocol(_)));
}

#[test]
fn test_persist_shipped_without_segment_fails() {
    let (_temp, log) = setup_temp_log(256);
    let err = log.persist_shipped(Lsn::make(300, 2), &[0u8; 10]).unwrap_err();
    assert!(matches!(err, RepError::MissingSegment(300)));
}

#[test]
fn test_create_next_segment_with_delta() {
    let (_temp, log) = setup_temp_log(256);
    let seg = log.create_next_segment(256).unwrap();
    assert_eq!(seg.segnum, 2);
    assert_eq!(seg.start_offset, 256);

    let registry = log.registry();
    assert!(registry.list().unwrap().contains(&seg.file_name()));
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[test]
fn test_subscriber_sees_flush_after_snapshot() {
    let (_temp, log) = setup_temp_log(4096);
    log.append(&[insert(1, 8)]).unwrap();
    let before = log.flush().unwrap();

    let (rx, snapshot) = log.subscribe(|durable| Ok(durable)).unwrap();
    assert_eq!(snapshot, before);

    let lsn = log.append(&[insert(2, 8)]).unwrap();
    let after = log.flush().unwrap();

    let batch = rx.recv().unwrap();
    assert_eq!(batch.start(), Some(lsn));
    assert_eq!(batch.end(), Some(after));
    assert_eq!(batch.block_starts, vec![lsn]);
    assert_eq!(batch.len(), after.distance(before));
}

#[test]
fn test_flush_crossing_segment_yields_two_pieces() {
    let (_temp, log) = setup_temp_log(512);
    let (rx, _) = log.subscribe(|_| Ok(())).unwrap();

    let mut last = None;
    while log.segments().len() < 2 {
        last = Some(log.append(&[insert(1, 60)]).unwrap());
    }
    log.flush().unwrap();

    let batch = rx.recv().unwrap();
    assert_eq!(batch.pieces.len(), 2);
    assert!(batch.pieces[0].new_segment.is_none());
    assert_eq!(batch.pieces[1].new_segment, Some(512));
    assert_eq!(batch.pieces[1].start, last.unwrap());
}

#[test]
fn test_close_subscriptions_ends_stream() {
    let (_temp, log) = setup_temp_log(4096);
    let (rx, _) = log.subscribe(|_| Ok(())).unwrap();
    log.close_subscriptions();
    assert!(rx.recv().is_err());
}

#[test]
fn test_shared_registry() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(FileRegistry::open(temp_dir.path()).unwrap());
    let log = LogManager::with_registry(Arc::clone(&registry), 1024).unwrap();
    assert_eq!(log.log_dir(), temp_dir.path());
    assert_eq!(registry.list().unwrap().len(), 1);
}

// =============================================================================
// Block Codec Tests
// =============================================================================

#[test]
fn test_block_crc_detects_corruption() {
    let lsn = Lsn::make(64, 1);
    let mut block = encode_block(lsn, &[insert(1, 8)]).unwrap();
    let header = BlockHeader::decode(&block[..BLOCK_HEADER_SIZE]).unwrap();
    assert_eq!(header.lsn, lsn);

    let last = block.len() - 1;
    block[last] ^= 0xff;
    let err = decode_block(&header, &block[BLOCK_HEADER_SIZE..]).unwrap_err();
    assert!(matches!(err, RepError::LogCorruption(_)));
}

#[test]
fn test_block_header_too_short() {
    assert!(BlockHeader::decode(&[0u8; 10]).is_err());
}

#[test]
fn test_block_header_out_of_range_position() {
    let err = BlockHeader::decode(&[0xAB; BLOCK_HEADER_SIZE]).unwrap_err();
    assert!(matches!(err, RepError::LogCorruption(_)));

    // Offset fits but the segment number does not
    let mut bytes = [0u8; BLOCK_HEADER_SIZE];
    bytes[8..12].copy_from_slice(&(1u32 << 16).to_le_bytes());
    let err = BlockHeader::decode(&bytes).unwrap_err();
    assert!(matches!(err, RepError::LogCorruption(_)));
}
