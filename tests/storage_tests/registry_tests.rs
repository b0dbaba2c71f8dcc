//! Tests for the file registry
//!
//! These tests verify:
//! - Openers of one name share a handle that stays valid until the last close
//! - Checkpoint discovery never invalidates a handle someone else holds
//! - Freed slots are reused and old handles to them go stale
//! - Removing a file closes it for every opener

use std::sync::Arc;

use atlasrep::storage::{CheckpointDescriptor, FileRegistry};
use atlasrep::wal::{LogManager, LogRecord};
use atlasrep::RepError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_registry() -> (TempDir, FileRegistry) {
    let temp_dir = TempDir::new().unwrap();
    let registry = FileRegistry::open(temp_dir.path()).unwrap();
    (temp_dir, registry)
}

// =============================================================================
// Reference Counting Tests
// =============================================================================

#[test]
fn test_shared_handle_survives_other_close() {
    let (_temp, registry) = setup_registry();
    let first = registry.create_file("data").unwrap();
    registry.write_durable(first, 0, b"hello").unwrap();

    let second = registry.open_file("data").unwrap();
    assert_eq!(first, second);
    registry.close(second);

    let mut buf = [0u8; 5];
    assert_eq!(registry.read_at(first, 0, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");

    registry.close(first);
    assert!(registry.read_at(first, 0, &mut buf).is_err());
    assert_eq!(registry.open_count(), 0);
}

#[test]
fn test_discover_keeps_checkpoint_handle_open() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(FileRegistry::open(temp_dir.path()).unwrap());
    let log = LogManager::with_registry(Arc::clone(&registry), 1024).unwrap();
    log.append(&[LogRecord::CreateTable {
        fid: 1,
        name: "t".to_string(),
    }])
    .unwrap();
    let at = log.flush().unwrap();
    let descriptor =
        CheckpointDescriptor::install(&registry, at, at.offset(), &[5u8; 300]).unwrap();

    // A shipper holds the data file while another backup connects
    let held = registry.open_file(&descriptor.data_file_name()).unwrap();
    let again = CheckpointDescriptor::discover(&registry, log.segments())
        .unwrap()
        .unwrap();
    assert_eq!(again, descriptor);

    let mut buf = [0u8; 300];
    assert_eq!(registry.read_at(held, 0, &mut buf).unwrap(), 300);
    assert_eq!(buf, [5u8; 300]);
    registry.close(held);
}

// =============================================================================
// Slot Reuse Tests
// =============================================================================

#[test]
fn test_closed_slot_reused_with_stale_old_handle() {
    let (_temp, registry) = setup_registry();
    let old = registry.create_file("a").unwrap();
    registry.close(old);

    let new = registry.create_file("b").unwrap();
    assert_ne!(old, new);
    registry.write_durable(new, 0, b"bbbb").unwrap();

    let mut buf = [0u8; 4];
    let err = registry.read_at(old, 0, &mut buf).unwrap_err();
    assert!(matches!(err, RepError::Protocol(_)));
    assert_eq!(registry.read_at(new, 0, &mut buf).unwrap(), 4);

    // Closing the stale handle leaves the new occupant alone
    registry.close(old);
    assert_eq!(registry.read_at(new, 0, &mut buf).unwrap(), 4);
}

#[test]
fn test_open_close_cycles_do_not_grow() {
    let (_temp, registry) = setup_registry();
    for i in 0..100 {
        let handle = registry.create_file(&format!("f{}", i % 3)).unwrap();
        registry.close(handle);
    }
    assert_eq!(registry.open_count(), 0);
    assert_eq!(registry.list().unwrap().len(), 3);
}

// =============================================================================
// Remove Tests
// =============================================================================

#[test]
fn test_remove_closes_for_every_opener() {
    let (temp, registry) = setup_registry();
    let first = registry.create_file("gone").unwrap();
    let _second = registry.open_file("gone").unwrap();

    registry.remove("gone").unwrap();
    assert!(!temp.path().join("gone").exists());
    assert_eq!(registry.open_count(), 0);
    assert!(registry.len(first).is_err());
}
