//! Tests for parallel replay
//!
//! These tests verify:
//! - OID-partitioned replay is idempotent
//! - Both strategies produce the same table for any thread count
//! - Offset partitioning cuts only at split points
//! - Replay stops at the first incomplete block
//! - Strategy selection from configuration

use atlasrep::config::ReplayStrategyKind;
use atlasrep::memtable::MemTable;
use atlasrep::replay::{
    OffsetPartitioned, OidPartition, OidPartitioned, Replay, ReplayRange, ReplayStrategy,
};
use atlasrep::wal::{LogManager, LogRecord, Lsn};
use atlasrep::Config;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Log with a table, inserts, updates, deletes and key changes spread over
/// several segments; returns the block starts
fn setup_workload() -> (TempDir, LogManager, Vec<Lsn>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_dir(temp_dir.path())
        .segment_size(2048)
        .build();
    let log = LogManager::open(&config).unwrap();

    let mut starts = vec![log
        .append(&[LogRecord::CreateTable {
            fid: 1,
            name: "t".to_string(),
        }])
        .unwrap()];

    for round in 0..6u32 {
        let mut records = Vec::new();
        for oid in 0..12u32 {
            let record = match (round, oid % 4) {
                (0, _) => LogRecord::Insert {
                    fid: 1,
                    oid,
                    key: format!("key-{}", oid).into_bytes(),
                    value: format!("v0-{}", oid).into_bytes(),
                },
                (_, 0) if round == 5 => LogRecord::Delete { fid: 1, oid },
                (_, 1) => LogRecord::UpdateKey {
                    fid: 1,
                    oid,
                    key: format!("key-{}-r{}", oid, round).into_bytes(),
                },
                (_, 2) => LogRecord::IndexInsert {
                    fid: 1,
                    key: format!("alt-{}-{}", oid, round).into_bytes(),
                    oid,
                },
                _ => LogRecord::Update {
                    fid: 1,
                    oid,
                    value: format!("v{}-{}", round, oid).into_bytes(),
                },
            };
            records.push(record);
            if records.len() == 3 {
                starts.push(log.append(&records).unwrap());
                records.clear();
            }
        }
        log.flush().unwrap();
    }

    (temp_dir, log, starts)
}

fn full_range(log: &LogManager, starts: &[Lsn]) -> ReplayRange {
    ReplayRange::new(log.start_lsn().unwrap(), log.durable_lsn()).with_split_points(starts.to_vec())
}

// =============================================================================
// OID Strategy Tests
// =============================================================================

#[test]
fn test_oid_partition_ownership() {
    let record = LogRecord::Update {
        fid: 1,
        oid: 10,
        value: vec![],
    };
    let owners: Vec<usize> = (0..4)
        .filter(|&index| OidPartition { index, count: 4 }.owns(&record))
        .collect();
    assert_eq!(owners, vec![2]);
}

#[test]
fn test_oid_replay_applies_every_record_once() {
    let (_temp, log, starts) = setup_workload();
    let range = full_range(&log, &starts);
    let table = MemTable::new();

    let stats = OidPartitioned::new(4)
        .replay(&log.scanner(), &table, &range)
        .unwrap();
    assert_eq!(stats.workers, 4);
    assert_eq!(stats.records_applied, stats.records_scanned);
    assert_eq!(stats.records_applied, 1 + 6 * 12);
    assert_eq!(stats.reached, log.durable_lsn());
}

#[test]
fn test_oid_replay_idempotent() {
    let (_temp, log, starts) = setup_workload();
    let range = full_range(&log, &starts);
    let table = MemTable::new();
    let strategy = OidPartitioned::new(3);

    strategy.replay(&log.scanner(), &table, &range).unwrap();
    let once = table.snapshot();
    let versions_once: usize = (0..12).map(|oid| table.versions(1, oid).len()).sum();

    strategy.replay(&log.scanner(), &table, &range).unwrap();
    assert_eq!(table.snapshot(), once);
    let versions_twice: usize = (0..12).map(|oid| table.versions(1, oid).len()).sum();
    assert_eq!(versions_once, versions_twice);
}

#[test]
fn test_replay_result_content() {
    let (_temp, log, starts) = setup_workload();
    let table = MemTable::new();
    OidPartitioned::new(2)
        .replay(&log.scanner(), &table, &full_range(&log, &starts))
        .unwrap();

    assert_eq!(table.table_name(1), Some("t".to_string()));
    // oid 0: deleted in the last round
    assert_eq!(table.get(1, 0), None);
    // oid 3: updated every round
    assert_eq!(table.get(1, 3), Some(b"v5-3".to_vec()));
    // oid 1: key moved every round
    assert_eq!(table.key_of(1, 1), Some(b"key-1-r5".to_vec()));
    assert_eq!(table.lookup(1, b"key-1-r5"), Some(1));
    // oid 2: secondary index entries
    assert_eq!(table.lookup(1, b"alt-2-3"), Some(2));
}

// =============================================================================
// Cross-Strategy Tests
// =============================================================================

#[test]
fn test_strategies_agree_for_any_thread_count() {
    let (_temp, log, starts) = setup_workload();
    let range = full_range(&log, &starts);

    let reference = MemTable::new();
    OidPartitioned::new(1)
        .replay(&log.scanner(), &reference, &range)
        .unwrap();
    let expected = reference.snapshot();

    for threads in [1, 2, 3, 5, 8] {
        let by_oid = MemTable::new();
        OidPartitioned::new(threads)
            .replay(&log.scanner(), &by_oid, &range)
            .unwrap();
        assert_eq!(by_oid.snapshot(), expected, "oid x{}", threads);

        let by_offset = MemTable::new();
        OffsetPartitioned::new(threads)
            .replay(&log.scanner(), &by_offset, &range)
            .unwrap();
        assert_eq!(by_offset.snapshot(), expected, "offset x{}", threads);
    }
}

#[test]
fn test_split_replay_equals_whole() {
    let (_temp, log, starts) = setup_workload();
    let whole = MemTable::new();
    OffsetPartitioned::new(1)
        .replay(&log.scanner(), &whole, &full_range(&log, &starts))
        .unwrap();

    // Two consecutive calls split at a block boundary
    let mid = starts[starts.len() / 2];
    let halves = MemTable::new();
    let strategy = OffsetPartitioned::new(2);
    strategy
        .replay(
            &log.scanner(),
            &halves,
            &ReplayRange::new(log.start_lsn().unwrap(), mid).with_split_points(starts.clone()),
        )
        .unwrap();
    strategy
        .replay(
            &log.scanner(),
            &halves,
            &ReplayRange::new(mid, log.durable_lsn()).with_split_points(starts.clone()),
        )
        .unwrap();

    assert_eq!(halves.snapshot(), whole.snapshot());
}

// =============================================================================
// Offset Partitioning Tests
// =============================================================================

#[test]
fn test_partition_without_hints_is_single_range() {
    let range = ReplayRange::new(Lsn::make(0, 1), Lsn::make(1000, 1));
    let parts = OffsetPartitioned::new(4).partition(&range);
    assert_eq!(parts, vec![(Lsn::make(0, 1), Lsn::make(1000, 1))]);
}

#[test]
fn test_partition_cuts_at_hints() {
    let hints: Vec<Lsn> = (1..10).map(|i| Lsn::make(i * 100, 1)).collect();
    let range = ReplayRange::new(Lsn::make(0, 1), Lsn::make(1000, 1)).with_split_points(hints.clone());
    let parts = OffsetPartitioned::new(4).partition(&range);

    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0].0, Lsn::make(0, 1));
    assert_eq!(parts[3].1, Lsn::make(1000, 1));
    for pair in parts.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
        assert!(hints.contains(&pair[1].0));
    }
}

#[test]
fn test_partition_with_few_hints() {
    let range = ReplayRange::new(Lsn::make(0, 1), Lsn::make(1000, 1))
        .with_split_points(vec![Lsn::make(900, 1)]);
    let parts = OffsetPartitioned::new(8).partition(&range);
    assert_eq!(
        parts,
        vec![
            (Lsn::make(0, 1), Lsn::make(900, 1)),
            (Lsn::make(900, 1), Lsn::make(1000, 1)),
        ]
    );
}

#[test]
fn test_split_points_outside_range_dropped() {
    let range = ReplayRange::new(Lsn::make(100, 1), Lsn::make(200, 1)).with_split_points(vec![
        Lsn::make(50, 1),
        Lsn::make(100, 1),
        Lsn::make(150, 1),
        Lsn::make(200, 1),
    ]);
    assert_eq!(range.split_points, vec![Lsn::make(150, 1)]);
}

#[test]
fn test_empty_range() {
    let (_temp, log, _) = setup_workload();
    let at = log.durable_lsn();
    let table = MemTable::new();
    let stats = OffsetPartitioned::new(4)
        .replay(&log.scanner(), &table, &ReplayRange::new(at, at))
        .unwrap();
    assert_eq!(stats.records_applied, 0);
    assert_eq!(stats.reached, at);
}

// =============================================================================
// Incomplete Range Tests
// =============================================================================

#[test]
fn test_replay_stops_before_incomplete_block() {
    let (_temp, log, starts) = setup_workload();
    let last = *starts.last().unwrap();
    let cut = last.advance(10);

    let table = MemTable::new();
    let stats = OffsetPartitioned::new(3)
        .replay(
            &log.scanner(),
            &table,
            &ReplayRange::new(log.start_lsn().unwrap(), cut).with_split_points(starts.clone()),
        )
        .unwrap();
    assert_eq!(stats.reached, last);

    let stats = OidPartitioned::new(3)
        .replay(
            &log.scanner(),
            &table,
            &ReplayRange::new(log.start_lsn().unwrap(), cut),
        )
        .unwrap();
    assert_eq!(stats.reached, last);
}

// =============================================================================
// Strategy Selection Tests
// =============================================================================

#[test]
fn test_strategy_from_config() {
    let config = Config::builder()
        .oid_replay_threads(3)
        .offset_replay_threads(5)
        .build();

    match ReplayStrategy::from_config(ReplayStrategyKind::Oid, &config) {
        ReplayStrategy::Oid(s) => assert_eq!(s.threads(), 3),
        other => panic!("Expected OID strategy, got {:?}", other),
    }
    match ReplayStrategy::from_config(ReplayStrategyKind::Offset, &config) {
        ReplayStrategy::Offset(s) => assert_eq!(s.threads(), 5),
        other => panic!("Expected offset strategy, got {:?}", other),
    }
}

#[test]
fn test_strategy_names() {
    assert_eq!("oid".parse::<ReplayStrategyKind>().unwrap(), ReplayStrategyKind::Oid);
    assert_eq!(
        "offset".parse::<ReplayStrategyKind>().unwrap(),
        ReplayStrategyKind::Offset
    );
    assert!("random".parse::<ReplayStrategyKind>().is_err());
}
