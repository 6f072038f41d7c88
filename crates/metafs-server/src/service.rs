//! Request handlers: filesystem operations, the shard map, and the
//! server-to-server migration path.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use metafs_kv::EntryValue;
use metafs_proto::*;
use metafs_types::{InodeId, Result, ShardId, Void};
use metafs_utils::routing_bucket;

use crate::migration_log::LogRecord;
use crate::shard::{Shard, ShardEvent, ShardStatus};
use crate::split_queue::PendingSplitTask;
use crate::worker::{NodeShared, WorkerContext};

/// Access-mode bits of an open request; any non-zero access mode counts as
/// a write and refreshes the entry's times.
const ACCMODE_MASK: u32 = 0o3;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn new_stat(mode: u32) -> StatRecord {
    let now = now_secs();
    StatRecord {
        mode,
        uid: 0,
        gid: 0,
        nlink: 1,
        size: 0,
        atime: now,
        mtime: now,
        ctime: now,
    }
}

/// Stateless op handlers over the shared node state. All per-shard state is
/// reached through the worker context passed into each call.
pub struct MetaService {
    shared: Arc<NodeShared>,
}

impl MetaService {
    pub fn new(shared: Arc<NodeShared>) -> Self {
        Self { shared }
    }

    /// Routing checks for a client request: unknown shard or a key outside
    /// the shard's current range means the client's map is stale; a target
    /// shard still catching up means busy.
    fn route(
        &self,
        worker: &WorkerContext,
        shard_id: u32,
        bucket: u64,
    ) -> std::result::Result<Arc<Shard>, RespStatus> {
        let shard = worker
            .shard(ShardId(shard_id))
            .ok_or(RespStatus::StaleRouting)?;
        if !shard.contains(bucket) {
            return Err(RespStatus::StaleRouting);
        }
        if shard.status() == ShardStatus::NotReady {
            return Err(RespStatus::Busy);
        }
        Ok(shard)
    }

    /// While a split is in flight every mutation also goes to the migration
    /// log, before the response is sent. `SplitAlmostDone` still logs: a
    /// request admitted under the wide range can apply its write after the
    /// ranges were published, and that write must reach the child.
    fn log_mutation(&self, shard: &Shard, record: LogRecord) -> Result<Void> {
        let status = shard.status();
        if status != ShardStatus::IsSplit && status != ShardStatus::SplitAlmostDone {
            return Ok(());
        }
        let log_id = shard.next_log_id();
        self.shared
            .log_store
            .append(*shard.id, log_id as u32, record.encode()?)
    }

    /// Inline split trigger, run after a mutation bumped the counter. The
    /// CAS guarantees one enqueued split per threshold crossing; everything
    /// here is non-blocking bookkeeping.
    fn maybe_trigger_split(&self, worker: &WorkerContext, shard: &Arc<Shard>) {
        if shard.element_count() <= self.shared.config.split_threshold {
            return;
        }
        if shard.end_key() == shard.start_key() {
            // nothing left to split
            return;
        }
        if !shard.try_begin_split() {
            return;
        }
        let child_id = self.shared.draw_child_shard_id();
        let mid = shard.split_point();
        let child = Arc::new(Shard::new_child(child_id, shard.id, mid + 1, shard.end_key()));
        worker.register_shard(child);
        self.shared.split_queue.push(PendingSplitTask {
            origin_worker: worker.worker_id,
            new_shard_id: child_id,
        });
        info!(
            shard = %shard.id,
            child = %child_id,
            elements = shard.element_count(),
            child_range = ?(mid + 1, shard.end_key()),
            "split triggered"
        );
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    pub fn get_inode(&self, worker: &WorkerContext, req: &GetInodeReq) -> Result<GetInodeRsp> {
        let mut rsp = GetInodeRsp::default();
        if let Err(status) = self.route(worker, req.shard_id, req.bucket) {
            rsp.status = status;
            return Ok(rsp);
        }
        match self.shared.dir_index.get(req.parent, &req.name)? {
            Some(value) => {
                rsp.inode = value.inode;
            }
            None => rsp.status = RespStatus::NotFound,
        }
        Ok(rsp)
    }

    pub fn stat(&self, worker: &WorkerContext, req: &StatReq) -> Result<StatRsp> {
        let mut rsp = StatRsp::default();
        if let Err(status) = self.route(worker, req.shard_id, req.bucket) {
            rsp.status = status;
            return Ok(rsp);
        }
        match self.shared.dir_index.get(req.parent, &req.name)? {
            Some(value) => {
                rsp.inode = value.inode;
                rsp.stat = value.stat;
            }
            None => rsp.status = RespStatus::NotFound,
        }
        Ok(rsp)
    }

    pub fn open(&self, worker: &WorkerContext, req: &OpenReq) -> Result<OpenRsp> {
        let mut rsp = OpenRsp::default();
        let shard = match self.route(worker, req.shard_id, req.bucket) {
            Ok(shard) => shard,
            Err(status) => {
                rsp.status = status;
                return Ok(rsp);
            }
        };
        let mut value = match self.shared.dir_index.get(req.parent, &req.name)? {
            Some(value) => value,
            None => {
                rsp.status = RespStatus::NotFound;
                return Ok(rsp);
            }
        };
        if req.mode & ACCMODE_MASK != 0 {
            // write open refreshes the times, which counts as a mutation
            let now = now_secs();
            value.stat.mtime = now;
            value.stat.atime = now;
            self.shared
                .dir_index
                .upsert(req.parent, &req.name, value.clone())?;
            self.log_mutation(
                &shard,
                LogRecord::Put {
                    parent: req.parent,
                    name: req.name.clone(),
                    inode: value.inode,
                    stat: value.stat.clone(),
                },
            )?;
        }
        rsp.inode = value.inode;
        rsp.stat = value.stat;
        Ok(rsp)
    }

    pub fn mknod(&self, worker: &WorkerContext, req: &MknodReq) -> Result<MknodRsp> {
        let mut rsp = MknodRsp::default();
        let shard = match self.route(worker, req.shard_id, req.bucket) {
            Ok(shard) => shard,
            Err(status) => {
                rsp.status = status;
                return Ok(rsp);
            }
        };
        let inode = worker.alloc_inode(false);
        let value = EntryValue {
            inode,
            stat: new_stat(req.mode),
        };
        if !self.shared.dir_index.insert(req.parent, &req.name, value.clone())? {
            rsp.status = RespStatus::Exists;
            return Ok(rsp);
        }
        worker.track_parent(req.bucket, req.parent);
        shard.add_elements(1);
        self.log_mutation(
            &shard,
            LogRecord::Put {
                parent: req.parent,
                name: req.name.clone(),
                inode,
                stat: value.stat.clone(),
            },
        )?;
        self.maybe_trigger_split(worker, &shard);
        rsp.inode = inode;
        rsp.stat = value.stat;
        Ok(rsp)
    }

    pub fn mkdir(&self, worker: &WorkerContext, req: &MkdirReq) -> Result<MkdirRsp> {
        let mut rsp = MkdirRsp::default();
        let shard = match self.route(worker, req.shard_id, req.bucket) {
            Ok(shard) => shard,
            Err(status) => {
                rsp.status = status;
                return Ok(rsp);
            }
        };
        let inode = worker.alloc_inode(true);
        let value = EntryValue {
            inode,
            stat: new_stat(req.mode),
        };
        if !self.shared.dir_index.insert(req.parent, &req.name, value.clone())? {
            rsp.status = RespStatus::Exists;
            return Ok(rsp);
        }
        worker.track_parent(req.bucket, req.parent);
        shard.add_elements(1);
        self.log_mutation(
            &shard,
            LogRecord::Put {
                parent: req.parent,
                name: req.name.clone(),
                inode,
                stat: value.stat,
            },
        )?;
        self.maybe_trigger_split(worker, &shard);
        rsp.inode = inode;
        Ok(rsp)
    }

    pub fn unlink(&self, worker: &WorkerContext, req: &UnlinkReq) -> Result<UnlinkRsp> {
        let mut rsp = UnlinkRsp::default();
        let shard = match self.route(worker, req.shard_id, req.bucket) {
            Ok(shard) => shard,
            Err(status) => {
                rsp.status = status;
                return Ok(rsp);
            }
        };
        match self.shared.dir_index.get(req.parent, &req.name)? {
            None => {
                rsp.status = RespStatus::NotFound;
                return Ok(rsp);
            }
            Some(value) if InodeId(value.inode).is_directory() => {
                rsp.status = RespStatus::IsDirectory;
                return Ok(rsp);
            }
            Some(_) => {}
        }
        self.shared.dir_index.remove(req.parent, &req.name)?;
        shard.sub_elements(1);
        self.log_mutation(
            &shard,
            LogRecord::Delete {
                parent: req.parent,
                name: req.name.clone(),
            },
        )?;
        Ok(rsp)
    }

    pub fn rmdir(&self, worker: &WorkerContext, req: &RmdirReq) -> Result<RmdirRsp> {
        let mut rsp = RmdirRsp::default();
        let shard = match self.route(worker, req.shard_id, req.bucket) {
            Ok(shard) => shard,
            Err(status) => {
                rsp.status = status;
                return Ok(rsp);
            }
        };
        let value = match self.shared.dir_index.get(req.parent, &req.name)? {
            Some(value) => value,
            None => {
                rsp.status = RespStatus::NotFound;
                return Ok(rsp);
            }
        };
        if !InodeId(value.inode).is_directory() {
            rsp.status = RespStatus::NotDirectory;
            return Ok(rsp);
        }
        if !self.shared.dir_index.is_empty_dir(value.inode)? {
            rsp.status = RespStatus::NotEmpty;
            return Ok(rsp);
        }
        self.shared.dir_index.remove(req.parent, &req.name)?;
        shard.sub_elements(1);
        self.log_mutation(
            &shard,
            LogRecord::Delete {
                parent: req.parent,
                name: req.name.clone(),
            },
        )?;
        Ok(rsp)
    }

    pub fn readdir(&self, worker: &WorkerContext, req: &ReaddirReq) -> Result<ReaddirRsp> {
        let mut rsp = ReaddirRsp::default();
        if let Err(status) = self.route(worker, req.shard_id, req.bucket) {
            rsp.status = status;
            return Ok(rsp);
        }
        let scan = self.shared.dir_index.scan(
            req.dir,
            req.offset,
            self.shared.config.wire_byte_budget,
        )?;
        rsp.is_more = scan.is_more;
        rsp.next_offset = scan.next_offset;
        rsp.entries = scan
            .entries
            .into_iter()
            .map(|(name, value)| DirEntryRecord {
                parent: req.dir,
                name,
                inode: value.inode,
            })
            .collect();
        Ok(rsp)
    }

    pub fn read_shard_map(&self, _req: &ReadShardMapReq) -> ReadShardMapRsp {
        ReadShardMapRsp {
            status: RespStatus::Success,
            shards: self.shared.global_dir.snapshot(),
        }
    }

    // -----------------------------------------------------------------------
    // Server-to-server migration path
    // -----------------------------------------------------------------------

    /// Target side of step one: create the local shard in `NotReady`.
    /// Replay-safe: an already-present shard acknowledges again.
    pub fn create_shard(&self, worker: &WorkerContext, req: &CreateShardReq) -> CreateShardRsp {
        let rsp = CreateShardRsp {
            status: RespStatus::Success,
            shard_id: req.shard_id,
        };
        if worker.shard(ShardId(req.shard_id)).is_some() {
            return rsp;
        }
        let shard = Arc::new(Shard::new(
            ShardId(req.shard_id),
            req.start_key,
            req.end_key,
            ShardStatus::NotReady,
        ));
        worker.register_shard(shard);
        info!(
            shard = req.shard_id,
            range = ?(req.start_key, req.end_key),
            "created migration target shard"
        );
        rsp
    }

    /// Target side of bulk copy. Upserts make cursor replay idempotent.
    pub fn send_shard_entries(
        &self,
        worker: &WorkerContext,
        req: &SendShardEntriesReq,
    ) -> Result<SendShardEntriesRsp> {
        let mut rsp = SendShardEntriesRsp {
            status: RespStatus::Success,
            shard_id: req.shard_id,
            is_more: req.is_more,
            cursor: req.cursor.clone(),
        };
        let shard = match worker.shard(ShardId(req.shard_id)) {
            Some(shard) if shard.status() == ShardStatus::NotReady => shard,
            _ => {
                rsp.status = RespStatus::Fail;
                return Ok(rsp);
            }
        };
        let key_space = self.shared.config.key_space();
        for entry in &req.entries {
            let value = EntryValue {
                inode: entry.inode,
                stat: entry.stat.clone(),
            };
            if self.shared.dir_index.insert(entry.parent, &entry.name, value.clone())? {
                shard.add_elements(1);
            } else {
                self.shared.dir_index.upsert(entry.parent, &entry.name, value)?;
            }
            worker.track_parent(routing_bucket(entry.parent, key_space), entry.parent);
        }
        debug!(shard = req.shard_id, entries = req.entries.len(), "bulk copy batch applied");
        Ok(rsp)
    }

    /// Target side of log shipping. The shard's log cursor is the applied
    /// watermark: batches entirely below it are duplicates and are skipped,
    /// a batch starting above it has a gap and is refused by answering with
    /// the watermark so the origin rewinds.
    pub fn send_shard_log(
        &self,
        worker: &WorkerContext,
        req: &SendShardLogReq,
    ) -> Result<SendShardLogRsp> {
        let mut rsp = SendShardLogRsp {
            status: RespStatus::Success,
            shard_id: req.shard_id,
            log_status: req.log_status,
            next_log_id: req.next_log_id,
        };
        let shard = match worker.shard(ShardId(req.shard_id)) {
            Some(shard) => shard,
            None => {
                rsp.status = RespStatus::Fail;
                return Ok(rsp);
            }
        };
        let watermark = shard.log_cursor();
        let batch_start = req.next_log_id.saturating_sub(req.count) as u64;
        if batch_start > watermark {
            warn!(
                shard = req.shard_id,
                batch_start,
                watermark,
                "log batch ahead of watermark, requesting rewind"
            );
            rsp.next_log_id = watermark as u32;
            return Ok(rsp);
        }
        let key_space = self.shared.config.key_space();
        let records = LogRecord::decode_batch(&req.entries, req.count)?;
        for (i, record) in records.into_iter().enumerate() {
            let log_id = batch_start + i as u64;
            if log_id < watermark {
                continue;
            }
            // The origin logs every mutation while splitting; only those
            // hashing into this shard's range belong here.
            let parent_id = match &record {
                LogRecord::Put { parent, .. } | LogRecord::Delete { parent, .. } => *parent,
            };
            let bucket = routing_bucket(parent_id, key_space);
            if !shard.contains(bucket) {
                continue;
            }
            match record {
                LogRecord::Put {
                    parent,
                    name,
                    inode,
                    stat,
                } => {
                    let value = EntryValue { inode, stat };
                    if self.shared.dir_index.insert(parent, &name, value.clone())? {
                        shard.add_elements(1);
                    } else {
                        self.shared.dir_index.upsert(parent, &name, value)?;
                    }
                    worker.track_parent(bucket, parent);
                }
                LogRecord::Delete { parent, name } => {
                    if self.shared.dir_index.remove(parent, &name)? {
                        shard.sub_elements(1);
                    }
                }
            }
        }
        shard.advance_log_cursor(req.next_log_id as u64);
        rsp.next_log_id = shard.log_cursor() as u32;

        if req.log_status == LogStatus::Done && shard.status() == ShardStatus::NotReady {
            shard.apply_event(ShardEvent::Promoted)?;
            self.shared.global_dir.publish_child(ShardDescriptor::new(
                *shard.id,
                shard.start_key(),
                shard.end_key(),
            ));
            info!(shard = req.shard_id, "target shard caught up and promoted");
        }
        Ok(rsp)
    }
}
