//! Per-worker owning state and the process-wide shared state every worker
//! and the coordinator hold a handle to.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use metafs_kv::{DirIndex, LogStore};
use metafs_types::{ShardId, WorkerId, INODE_DIR_BIT};
use metafs_utils::server_slot_for_shard;

use crate::config::ServerConfig;
use crate::directory::GlobalShardDirectory;
use crate::shard::Shard;
use crate::split_queue::SplitTaskQueue;

/// State shared by all workers and the coordinator of one server process.
pub struct NodeShared {
    pub config: ServerConfig,
    pub global_dir: GlobalShardDirectory,
    pub split_queue: SplitTaskQueue,
    pub dir_index: Arc<dyn DirIndex>,
    pub log_store: Arc<dyn LogStore>,
    /// Child shard id allocator, strided by session count so ids drawn on
    /// different servers never collide.
    next_shard_id: AtomicU32,
}

impl NodeShared {
    pub fn new(
        config: ServerConfig,
        dir_index: Arc<dyn DirIndex>,
        log_store: Arc<dyn LogStore>,
    ) -> Self {
        let first = config.bootstrap_shards() + config.server_slot;
        Self {
            config,
            global_dir: GlobalShardDirectory::new(),
            split_queue: SplitTaskQueue::new(),
            dir_index,
            log_store,
            next_shard_id: AtomicU32::new(first),
        }
    }

    /// Draw a child shard id, re-drawing while the placement rule would keep
    /// it on this server. A split must always move data off-server; with a
    /// single session there is nowhere else to go, so local placement stands.
    pub fn draw_child_shard_id(&self) -> ShardId {
        let sessions = self.config.num_sessions;
        loop {
            let id = self.next_shard_id.fetch_add(sessions, Ordering::AcqRel);
            let slot = server_slot_for_shard(id, sessions, self.config.workers_per_server);
            if sessions == 1 || slot != self.config.server_slot {
                return ShardId(id);
            }
        }
    }

    pub fn target_slot_for(&self, shard_id: ShardId) -> u32 {
        server_slot_for_shard(*shard_id, self.config.num_sessions, self.config.workers_per_server)
    }
}

/// State owned by one worker slot: its shards, its directory-to-bucket
/// index, and its inode allocator.
///
/// This is the authoritative shard table; the split queue and the global
/// directory hold only shard ids and resolve through it.
pub struct WorkerContext {
    pub worker_id: WorkerId,
    pub shared: Arc<NodeShared>,
    shards: RwLock<HashMap<u32, Arc<Shard>>>,
    /// Routing key bucket -> parent directories whose entries hash there.
    /// Walked bucket by bucket during bulk copy.
    parent_index: RwLock<BTreeMap<u64, BTreeSet<u64>>>,
    next_inode_seq: AtomicU64,
}

impl WorkerContext {
    pub fn new(worker_id: WorkerId, shared: Arc<NodeShared>) -> Self {
        // (slot 0, worker 0, seq 1) with the directory bit is the root
        // directory's well-known id; that sequence slot is never handed out
        let first_seq = if shared.config.server_slot == 0 && *worker_id == 0 {
            1
        } else {
            0
        };
        Self {
            worker_id,
            shared,
            shards: RwLock::new(HashMap::new()),
            parent_index: RwLock::new(BTreeMap::new()),
            next_inode_seq: AtomicU64::new(first_seq),
        }
    }

    pub fn register_shard(&self, shard: Arc<Shard>) {
        self.shards.write().insert(*shard.id, shard);
    }

    pub fn shard(&self, id: ShardId) -> Option<Arc<Shard>> {
        self.shards.read().get(&*id).cloned()
    }

    pub fn remove_shard(&self, id: ShardId) -> Option<Arc<Shard>> {
        self.shards.write().remove(&*id)
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.read().keys().map(|&id| ShardId(id)).collect()
    }

    /// Allocate an inode id: server slot and worker id in the high bytes, a
    /// local sequence below. Bits 62 and 63 stay clear of the sequence; bit
    /// 63 is the directory flag and bit 62 is reserved by the migration log.
    pub fn alloc_inode(&self, directory: bool) -> u64 {
        let seq = self.next_inode_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = self.shared.config.server_slot as u64;
        let worker = *self.worker_id as u64;
        let id = (((slot << 8) | worker) << 40) | seq;
        if directory {
            id | INODE_DIR_BIT
        } else {
            id
        }
    }

    /// Remember that `parent`'s entries live in routing bucket `bucket`.
    pub fn track_parent(&self, bucket: u64, parent: u64) {
        self.parent_index.write().entry(bucket).or_default().insert(parent);
    }

    /// Buckets within `[start, end]` that hold at least one directory,
    /// each with its directories in ascending order. Bulk copy iterates this.
    pub fn parents_in_range(&self, start: u64, end: u64) -> Vec<(u64, Vec<u64>)> {
        self.parent_index
            .read()
            .range(start..=end)
            .map(|(&bucket, parents)| (bucket, parents.iter().copied().collect()))
            .collect()
    }
}
