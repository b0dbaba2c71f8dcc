//! Tests for the segment directory
//!
//! These tests verify:
//! - Segment creation and numbering
//! - Offset and LSN lookups (exactly one covering segment)
//! - Rejection of overlapping or out-of-order segments
//! - Rejection of segments an LSN cannot address
//! - File name round trips

use atlasrep::storage::names;
use atlasrep::wal::{Lsn, SegmentDirectory, SegmentId, MAX_OFFSET};
use atlasrep::RepError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Directory with `count` back-to-back segments of `size` bytes
fn setup_directory(size: u64, count: u32) -> SegmentDirectory {
    let dir = SegmentDirectory::new(size);
    for segnum in 1..=count {
        dir.create_segment(segnum, (segnum as u64 - 1) * size).unwrap();
    }
    dir
}

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_create_segment_bounds() {
    let dir = SegmentDirectory::new(4096);
    let seg = dir.create_segment(1, 0).unwrap();
    assert_eq!(seg.start_offset, 0);
    assert_eq!(seg.end_offset, 4096);
    assert_eq!(dir.len(), 1);
}

#[test]
fn test_segment_may_start_after_gap() {
    let dir = SegmentDirectory::new(4096);
    dir.create_segment(1, 0).unwrap();
    let second = dir.create_segment(2, 8192).unwrap();
    assert_eq!(second.start_offset, 8192);
    assert!(dir.get_offset_segment(5000).is_err());
}

#[test]
fn test_reject_overlap() {
    let dir = SegmentDirectory::new(4096);
    dir.create_segment(1, 0).unwrap();
    let err = dir.create_segment(2, 4000).unwrap_err();
    assert!(matches!(err, RepError::Protocol(_)));
}

#[test]
fn test_reject_non_successor_number() {
    let dir = SegmentDirectory::new(4096);
    dir.create_segment(1, 0).unwrap();
    assert!(dir.create_segment(3, 4096).is_err());
}

#[test]
fn test_reject_segment_number_past_lsn_range() {
    let dir = SegmentDirectory::new(4096);
    let last = dir
        .insert(SegmentId {
            segnum: (1 << 16) - 1,
            start_offset: 0,
            end_offset: 4096,
        })
        .unwrap();
    assert_eq!(last.start_lsn().segment(), (1 << 16) - 1);

    let err = dir.create_segment(1 << 16, 4096).unwrap_err();
    assert!(matches!(err, RepError::Protocol(_)));
    assert_eq!(dir.len(), 1);
}

#[test]
fn test_reject_segment_past_address_space() {
    let dir = SegmentDirectory::new(4096);
    let err = dir.create_segment(1, MAX_OFFSET - 100).unwrap_err();
    assert!(matches!(err, RepError::Protocol(_)));
    assert!(dir.create_segment(1, u64::MAX - 10).is_err());
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_every_offset_has_exactly_one_segment() {
    let dir = setup_directory(1000, 4);
    for offset in (0..4000).step_by(37) {
        let seg = dir.get_offset_segment(offset).unwrap();
        let covering = dir.all().iter().filter(|s| s.contains(offset)).count();
        assert_eq!(covering, 1);
        assert!(seg.contains(offset));
    }
}

#[test]
fn test_segment_of_and_offset_in_segment() {
    let dir = setup_directory(1000, 3);
    let lsn = Lsn::make(2500, 3);
    assert_eq!(dir.segment_of(lsn).unwrap().segnum, 3);
    assert_eq!(dir.offset_in_segment(lsn).unwrap(), 500);
}

#[test]
fn test_segment_of_wrong_number_fails() {
    let dir = setup_directory(1000, 3);
    let err = dir.segment_of(Lsn::make(2500, 2)).unwrap_err();
    assert!(matches!(err, RepError::MissingSegment(2500)));
}

#[test]
fn test_missing_offset() {
    let dir = setup_directory(1000, 2);
    assert!(matches!(
        dir.get_offset_segment(2000),
        Err(RepError::MissingSegment(2000))
    ));
}

#[test]
fn test_first_last_and_from() {
    let dir = setup_directory(1000, 4);
    assert_eq!(dir.first_segment().unwrap().segnum, 1);
    assert_eq!(dir.last_segment().unwrap().segnum, 4);

    let from: Vec<u32> = dir.segments_from(1500).iter().map(|s| s.segnum).collect();
    assert_eq!(from, vec![2, 3, 4]);
}

// =============================================================================
// File Name Tests
// =============================================================================

#[test]
fn test_segment_file_name_round_trip() {
    let seg = SegmentId {
        segnum: 12,
        start_offset: 0x4000,
        end_offset: 0x8000,
    };
    let name = seg.file_name();
    assert_eq!(name, "log-0000000c-0000000000004000-0000000000008000");
    assert_eq!(SegmentId::from_file_name(&name).unwrap(), seg);
}

#[test]
fn test_malformed_file_name() {
    assert!(SegmentId::from_file_name("log-zz").is_err());
    assert!(!names::is_segment_file_name("chk-0000000000000000-0000000000000010"));
}

#[test]
fn test_checkpoint_names() {
    let marker = names::checkpoint_marker_name(0x10, 0x20);
    assert_eq!(marker, "chk-0000000000000010-0000000000000020");
    assert_eq!(names::parse_checkpoint_marker_name(&marker).unwrap(), (0x10, 0x20));
    assert_eq!(names::checkpoint_data_name(0x10), "chd-0000000000000010");
    assert_eq!(names::promise_name("chd-0000000000000010"), "chd-0000000000000010.promise");
}
