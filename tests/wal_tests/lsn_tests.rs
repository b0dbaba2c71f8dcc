//! Tests for LSNs
//!
//! These tests verify:
//! - Packing of (offset, segment) into a u64
//! - Ordering by offset first
//! - Distance and advance

use atlasrep::wal::{Lsn, SEGMENT_BITS};

// =============================================================================
// Packing Tests
// =============================================================================

#[test]
fn test_make_and_split() {
    let lsn = Lsn::make(0x1234_5678, 7);
    assert_eq!(lsn.offset(), 0x1234_5678);
    assert_eq!(lsn.segment(), 7);
}

#[test]
fn test_packed_layout() {
    let lsn = Lsn::make(3, 2);
    assert_eq!(lsn.to_u64(), (3 << SEGMENT_BITS) | 2);
    assert_eq!(Lsn::from_u64(lsn.to_u64()), lsn);
}

#[test]
fn test_invalid_lsn() {
    assert!(!Lsn::INVALID.is_valid());
    assert_eq!(Lsn::INVALID.to_u64(), u64::MAX);
    assert!(Lsn::make(0, 1).is_valid());
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_ordering_by_offset_first() {
    let a = Lsn::make(100, 5);
    let b = Lsn::make(200, 1);
    assert!(a < b);

    let c = Lsn::make(100, 6);
    assert!(a < c);
    assert_eq!(a.max(c), c);
}

#[test]
fn test_sort_lsns() {
    let mut lsns = vec![Lsn::make(30, 2), Lsn::make(10, 1), Lsn::make(20, 1)];
    lsns.sort();
    assert_eq!(
        lsns.iter().map(|l| l.offset()).collect::<Vec<_>>(),
        vec![10, 20, 30]
    );
}

// =============================================================================
// Arithmetic Tests
// =============================================================================

#[test]
fn test_distance() {
    let a = Lsn::make(1000, 1);
    let b = Lsn::make(1600, 1);
    assert_eq!(b.distance(a), 600);
}

#[test]
fn test_advance_keeps_segment() {
    let a = Lsn::make(1000, 3);
    let b = a.advance(24);
    assert_eq!(b.offset(), 1024);
    assert_eq!(b.segment(), 3);
}
