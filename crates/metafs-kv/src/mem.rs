use std::collections::BTreeMap;

use parking_lot::RwLock;

use metafs_types::{Result, Void};

use crate::dir_index::{DirIndex, DirScan, EntryValue};
use crate::log_store::{LogScan, LogStore};

/// In-memory directory-entry index over a sorted map. The scan offset is the
/// number of entries already consumed within the parent.
#[derive(Default)]
pub struct MemDirIndex {
    entries: RwLock<BTreeMap<(u64, String), EntryValue>>,
}

impl MemDirIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_weight(name: &str) -> usize {
        // name plus the fixed inode/stat footprint of a serialized entry
        name.len() + 64
    }
}

impl DirIndex for MemDirIndex {
    fn get(&self, parent: u64, name: &str) -> Result<Option<EntryValue>> {
        Ok(self
            .entries
            .read()
            .get(&(parent, name.to_string()))
            .cloned())
    }

    fn insert(&self, parent: u64, name: &str, value: EntryValue) -> Result<bool> {
        let mut entries = self.entries.write();
        let key = (parent, name.to_string());
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, value);
        Ok(true)
    }

    fn upsert(&self, parent: u64, name: &str, value: EntryValue) -> Result<Void> {
        self.entries.write().insert((parent, name.to_string()), value);
        Ok(())
    }

    fn remove(&self, parent: u64, name: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .remove(&(parent, name.to_string()))
            .is_some())
    }

    fn scan(&self, parent: u64, offset: u64, byte_budget: usize) -> Result<DirScan> {
        let entries = self.entries.read();
        let mut page = Vec::new();
        let mut bytes = 0usize;
        let mut is_more = false;
        for ((_, name), value) in entries
            .range((parent, String::new())..)
            .take_while(|((p, _), _)| *p == parent)
            .skip(offset as usize)
        {
            let weight = Self::entry_weight(name);
            if !page.is_empty() && bytes + weight > byte_budget {
                is_more = true;
                break;
            }
            bytes += weight;
            page.push((name.clone(), value.clone()));
        }
        let next_offset = offset + page.len() as u64;
        Ok(DirScan {
            entries: page,
            next_offset,
            is_more,
        })
    }

    fn is_empty_dir(&self, parent: u64) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .range((parent, String::new())..)
            .take_while(|((p, _), _)| *p == parent)
            .next()
            .is_none())
    }
}

/// In-memory migration log over a sorted map keyed by `(shard_id, log_id)`.
#[derive(Default)]
pub struct MemLogStore {
    records: RwLock<BTreeMap<(u32, u32), Vec<u8>>>,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemLogStore {
    fn append(&self, shard_id: u32, log_id: u32, record: Vec<u8>) -> Result<Void> {
        self.records.write().insert((shard_id, log_id), record);
        Ok(())
    }

    fn scan_from(&self, shard_id: u32, from_log_id: u32, byte_budget: usize) -> Result<LogScan> {
        let records = self.records.read();
        let mut page = Vec::new();
        let mut bytes = 0usize;
        let mut is_more = false;
        let mut next_log_id = from_log_id;
        for ((_, log_id), record) in records
            .range((shard_id, from_log_id)..)
            .take_while(|((s, _), _)| *s == shard_id)
        {
            if !page.is_empty() && bytes + record.len() > byte_budget {
                is_more = true;
                break;
            }
            bytes += record.len();
            page.push((*log_id, record.clone()));
            next_log_id = *log_id + 1;
        }
        Ok(LogScan {
            records: page,
            next_log_id,
            is_more,
        })
    }

    fn truncate(&self, shard_id: u32) -> Result<Void> {
        self.records.write().retain(|(s, _), _| *s != shard_id);
        Ok(())
    }
}
