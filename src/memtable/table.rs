//! MemTable implementation
//!
//! Sharded hash maps of version chains plus BTreeMap indexes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::replay::RedoTarget;
use crate::wal::{Fid, Lsn, Oid};

use super::Version;

const SHARDS: usize = 16;

/// Newest-first version chain
type Chain = Vec<Arc<Version>>;

struct Table {
    name: RwLock<Option<String>>,
    tuples: Vec<RwLock<HashMap<Oid, Chain>>>,
    /// OID → (LSN that set it, primary key)
    primary_keys: RwLock<HashMap<Oid, (Lsn, Vec<u8>)>>,
    /// Key → (OID, LSN of the newest entry)
    index: RwLock<BTreeMap<Vec<u8>, (Oid, Lsn)>>,
}

impl Table {
    fn new() -> Self {
        Self {
            name: RwLock::new(None),
            tuples: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            primary_keys: RwLock::new(HashMap::new()),
            index: RwLock::new(BTreeMap::new()),
        }
    }

    fn shard(&self, oid: Oid) -> &RwLock<HashMap<Oid, Chain>> {
        &self.tuples[oid as usize % SHARDS]
    }
}

/// Comparable image of a table's latest state
pub type TableSnapshot = BTreeMap<(Fid, Oid), (Lsn, Option<Vec<u8>>)>;

/// In-memory tuple store fed by replay
pub struct MemTable {
    tables: RwLock<HashMap<Fid, Arc<Table>>>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table(&self, fid: Fid) -> Option<Arc<Table>> {
        self.tables.read().get(&fid).cloned()
    }

    /// Tables appear on first touch so replay workers never wait on a
    /// CreateTable record owned by another partition
    fn table_or_create(&self, fid: Fid) -> Arc<Table> {
        if let Some(table) = self.table(fid) {
            return table;
        }
        Arc::clone(
            self.tables
                .write()
                .entry(fid)
                .or_insert_with(|| Arc::new(Table::new())),
        )
    }

    /// Latest visible value of a tuple (None if absent or deleted)
    pub fn get(&self, fid: Fid, oid: Oid) -> Option<Vec<u8>> {
        self.latest(fid, oid).and_then(|v| v.data.clone())
    }

    /// Newest version, tombstones included
    pub fn latest(&self, fid: Fid, oid: Oid) -> Option<Arc<Version>> {
        let table = self.table(fid)?;
        let shard = table.shard(oid).read();
        shard.get(&oid).and_then(|chain| chain.first().cloned())
    }

    /// All versions, newest first
    pub fn versions(&self, fid: Fid, oid: Oid) -> Vec<Arc<Version>> {
        self.table(fid)
            .and_then(|t| t.shard(oid).read().get(&oid).cloned())
            .unwrap_or_default()
    }

    /// OID an index key points at
    pub fn lookup(&self, fid: Fid, key: &[u8]) -> Option<Oid> {
        let table = self.table(fid)?;
        let index = table.index.read();
        index.get(key).map(|(oid, _)| *oid)
    }

    /// Current primary key of a tuple
    pub fn key_of(&self, fid: Fid, oid: Oid) -> Option<Vec<u8>> {
        let table = self.table(fid)?;
        let keys = table.primary_keys.read();
        keys.get(&oid).map(|(_, key)| key.clone())
    }

    pub fn table_name(&self, fid: Fid) -> Option<String> {
        self.table(fid).and_then(|t| t.name.read().clone())
    }

    /// Number of tuples with at least one version
    pub fn tuple_count(&self) -> usize {
        self.tables
            .read()
            .values()
            .map(|t| t.tuples.iter().map(|s| s.read().len()).sum::<usize>())
            .sum()
    }

    /// Newest version of every tuple, ordered by (fid, oid)
    pub fn snapshot(&self) -> TableSnapshot {
        let mut image = BTreeMap::new();
        for (fid, table) in self.tables.read().iter() {
            for shard in &table.tuples {
                for (oid, chain) in shard.read().iter() {
                    if let Some(head) = chain.first() {
                        image.insert((*fid, *oid), (head.lsn, head.data.clone()));
                    }
                }
            }
        }
        image
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RedoTarget for MemTable {
    fn create_table(&self, fid: Fid, name: &str) {
        let table = self.table_or_create(fid);
        *table.name.write() = Some(name.to_string());
    }

    fn install_version(&self, fid: Fid, oid: Oid, version: Version) -> bool {
        let table = self.table_or_create(fid);
        let mut shard = table.shard(oid).write();
        let chain = shard.entry(oid).or_default();

        // Chain is newest first; find the slot that keeps it sorted
        match chain.binary_search_by(|v| version.lsn.cmp(&v.lsn)) {
            Ok(_) => false,
            Err(slot) => {
                chain.insert(slot, Arc::new(version));
                true
            }
        }
    }

    fn index_insert(&self, fid: Fid, key: &[u8], oid: Oid, lsn: Lsn) {
        let table = self.table_or_create(fid);
        let mut index = table.index.write();
        let newer = index.get(key).map_or(true, |(_, existing)| *existing < lsn);
        if newer {
            index.insert(key.to_vec(), (oid, lsn));
        }
    }

    fn update_key(&self, fid: Fid, oid: Oid, key: &[u8], lsn: Lsn) {
        let table = self.table_or_create(fid);
        let mut keys = table.primary_keys.write();
        let newer = keys.get(&oid).map_or(true, |(existing, _)| *existing < lsn);
        if newer {
            keys.insert(oid, (lsn, key.to_vec()));
        }
    }
}
