//! Redo handlers shared by every replay strategy
//!
//! Each handler builds whatever it installs completely before handing it
//! to the target, so a reader never observes a half-applied record.

use crate::error::Result;
use crate::memtable::Version;
use crate::wal::{Fid, LogRecord, Lsn, Oid, ScannedRecord};

use super::RedoTarget;

/// Apply one scanned record
pub fn apply(target: &dyn RedoTarget, scanned: &ScannedRecord) -> Result<()> {
    let lsn = scanned.lsn;
    match &scanned.record {
        LogRecord::CreateTable { fid, name } => recover_create_table(target, *fid, name),
        LogRecord::Insert {
            fid,
            oid,
            key,
            value,
        } => recover_insert(target, *fid, *oid, key, value, lsn),
        LogRecord::Update { fid, oid, value } => {
            recover_update(target, *fid, *oid, Some(value.as_slice()), lsn)
        }
        LogRecord::Delete { fid, oid } => recover_update(target, *fid, *oid, None, lsn),
        LogRecord::IndexInsert { fid, key, oid } => {
            recover_index_insert(target, *fid, key, *oid, lsn)
        }
        LogRecord::UpdateKey { fid, oid, key } => {
            recover_update_key(target, *fid, *oid, key, lsn)
        }
    }
    Ok(())
}

pub fn recover_create_table(target: &dyn RedoTarget, fid: Fid, name: &str) {
    target.create_table(fid, name);
}

/// New tuple: first version plus its primary key
pub fn recover_insert(
    target: &dyn RedoTarget,
    fid: Fid,
    oid: Oid,
    key: &[u8],
    value: &[u8],
    lsn: Lsn,
) {
    let version = prepare_version(lsn, Some(value));
    if target.install_version(fid, oid, version) {
        tracing::trace!("redo insert fid={} oid={} at {}", fid, oid, lsn);
    }
    target.update_key(fid, oid, key, lsn);
    target.index_insert(fid, key, oid, lsn);
}

/// Update or delete (`value == None`)
pub fn recover_update(target: &dyn RedoTarget, fid: Fid, oid: Oid, value: Option<&[u8]>, lsn: Lsn) {
    let version = prepare_version(lsn, value);
    target.install_version(fid, oid, version);
}

pub fn recover_index_insert(target: &dyn RedoTarget, fid: Fid, key: &[u8], oid: Oid, lsn: Lsn) {
    target.index_insert(fid, key, oid, lsn);
}

pub fn recover_update_key(target: &dyn RedoTarget, fid: Fid, oid: Oid, key: &[u8], lsn: Lsn) {
    target.update_key(fid, oid, key, lsn);
    target.index_insert(fid, key, oid, lsn);
}

/// Build the version a record produces; the target links it into the chain
pub fn prepare_version(lsn: Lsn, value: Option<&[u8]>) -> Version {
    Version {
        lsn,
        data: value.map(<[u8]>::to_vec),
    }
}
