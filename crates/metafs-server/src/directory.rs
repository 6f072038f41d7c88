//! Process-wide shard directory: shard id to published key range.

use std::collections::HashMap;

use parking_lot::RwLock;

use metafs_proto::ShardDescriptor;

/// Mapping read by clients (through read-shard-map) and by the split
/// protocol. One reader/writer lock; the split publication is the only
/// writer that touches two rows at once.
#[derive(Default)]
pub struct GlobalShardDirectory {
    ranges: RwLock<HashMap<u32, (u64, u64)>>,
}

impl GlobalShardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, desc: ShardDescriptor) {
        self.ranges
            .write()
            .insert(desc.id, (desc.start_key, desc.end_key));
    }

    pub fn get(&self, shard_id: u32) -> Option<ShardDescriptor> {
        self.ranges
            .read()
            .get(&shard_id)
            .map(|&(start, end)| ShardDescriptor::new(shard_id, start, end))
    }

    /// Narrow the parent to end at `parent_end_key` and publish the child,
    /// under one write lock. No reader can observe the parent narrowed
    /// without the child present, or the other way around.
    pub fn publish_split(&self, parent_id: u32, parent_end_key: u64, child: ShardDescriptor) {
        let mut ranges = self.ranges.write();
        if let Some(range) = ranges.get_mut(&parent_id) {
            range.1 = parent_end_key;
        }
        ranges.insert(child.id, (child.start_key, child.end_key));
    }

    /// Target-side publication: insert the child and narrow whichever
    /// descriptor still covers the child's range, under one write lock.
    /// Idempotent against replayed promotions.
    pub fn publish_child(&self, child: ShardDescriptor) {
        let mut ranges = self.ranges.write();
        for (&id, range) in ranges.iter_mut() {
            if id != child.id && range.0 <= child.start_key && child.end_key <= range.1 {
                range.1 = child.start_key - 1;
                break;
            }
        }
        ranges.insert(child.id, (child.start_key, child.end_key));
    }

    /// All descriptors, ordered by start key. This is the read-shard-map
    /// payload.
    pub fn snapshot(&self) -> Vec<ShardDescriptor> {
        let ranges = self.ranges.read();
        let mut descs: Vec<ShardDescriptor> = ranges
            .iter()
            .map(|(&id, &(start, end))| ShardDescriptor::new(id, start, end))
            .collect();
        descs.sort_by_key(|d| d.start_key);
        descs
    }

    pub fn len(&self) -> usize {
        self.ranges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.read().is_empty()
    }
}

/// Check that descriptors partition `[0, key_space)` into contiguous
/// closed-closed intervals. Used by tests and debug assertions.
pub fn ranges_partition_key_space(descs: &[ShardDescriptor], key_space: u64) -> bool {
    let mut sorted: Vec<&ShardDescriptor> = descs.iter().collect();
    sorted.sort_by_key(|d| d.start_key);
    let mut expected = 0u64;
    for desc in sorted {
        if desc.start_key != expected || desc.end_key < desc.start_key {
            return false;
        }
        expected = desc.end_key + 1;
    }
    expected == key_space
}
