//! The split coordinator: one background thread per server that drives
//! every cross-server shard migration to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use metafs_net::Transport;
use metafs_proto::*;
use metafs_types::{Result, Status, StatusCode, Void};

use crate::shard::{Shard, ShardEvent, ShardStatus};
use crate::split_queue::PendingSplitTask;
use crate::worker::{NodeShared, WorkerContext};

pub struct SplitCoordinator {
    shared: Arc<NodeShared>,
    workers: Vec<Arc<WorkerContext>>,
    transport: Arc<dyn Transport>,
}

impl SplitCoordinator {
    pub fn new(
        shared: Arc<NodeShared>,
        workers: Vec<Arc<WorkerContext>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            shared,
            workers,
            transport,
        }
    }

    /// Drain the task queue until shutdown. Busy-poll with a bounded sleep
    /// when empty. A failed split is an invariant violation: abort rather
    /// than leave metadata divergent.
    pub fn run(&self, shutdown: &AtomicBool) {
        let idle = Duration::from_millis(self.shared.config.coordinator_idle_sleep_ms);
        while !shutdown.load(Ordering::Acquire) {
            match self.shared.split_queue.pop() {
                Some(task) => {
                    if let Err(err) = self.run_one_task(task) {
                        panic!("split of shard {} failed: {}", task.new_shard_id, err);
                    }
                }
                None => thread::sleep(idle),
            }
        }
    }

    /// Drain everything queued right now, synchronously. Test harness entry
    /// point; `run` uses the same per-task path.
    pub fn run_pending(&self) -> Result<usize> {
        let mut ran = 0;
        while let Some(task) = self.shared.split_queue.pop() {
            self.run_one_task(task)?;
            ran += 1;
        }
        Ok(ran)
    }

    /// One complete migration: create the target shard, bulk-copy the
    /// sub-range, ship the log until caught up, then clean up.
    pub fn run_one_task(&self, task: PendingSplitTask) -> Result<Void> {
        let worker = self
            .workers
            .get(*task.origin_worker as usize)
            .ok_or_else(|| bug(format!("unknown worker {}", task.origin_worker)))?;
        let child = worker
            .shard(task.new_shard_id)
            .ok_or_else(|| bug(format!("no bookkeeping shard {}", task.new_shard_id)))?;
        let parent = worker
            .shard(child.predecessor_id)
            .ok_or_else(|| bug(format!("no parent shard {}", child.predecessor_id)))?;
        let target = self.shared.target_slot_for(child.id);
        info!(
            parent = %parent.id,
            child = %child.id,
            target,
            range = ?(child.start_key(), child.end_key()),
            "starting split"
        );

        self.create_target_shard(&child, target)?;
        let moved = self.bulk_copy(worker, &child, target)?;
        self.ship_logs(&parent, &child, target)?;

        // cleanup: the parent is back to normal service, the migration log
        // and the bookkeeping child are no longer needed
        parent.apply_event(ShardEvent::CatchUpComplete)?;
        parent.reset_log_cursor();
        self.shared.log_store.truncate(*parent.id)?;
        worker.remove_shard(child.id);
        parent.sub_elements(moved);
        info!(parent = %parent.id, child = %child.id, moved, "split complete");
        Ok(())
    }

    fn create_target_shard(&self, child: &Shard, target: u32) -> Result<Void> {
        let req = Request::CreateShard(CreateShardReq {
            shard_id: *child.id,
            start_key: child.start_key(),
            end_key: child.end_key(),
        });
        match self.transport.call(target, &req)? {
            Response::CreateShard(rsp) if rsp.status == RespStatus::Success => Ok(()),
            other => Err(bug(format!("create-shard rejected: {:?}", other))),
        }
    }

    /// Walk the parent's directories whose buckets fall in the child range,
    /// shipping byte-budgeted batches of entries. Advances strictly by
    /// cursor; a completed directory is never re-sent.
    fn bulk_copy(&self, worker: &WorkerContext, child: &Shard, target: u32) -> Result<u64> {
        let budget = self.shared.config.wire_byte_budget;
        let buckets = worker.parents_in_range(child.start_key(), child.end_key());
        let dirs: Vec<(u64, u64)> = buckets
            .iter()
            .flat_map(|(bucket, parents)| parents.iter().map(move |&p| (*bucket, p)))
            .collect();

        let mut moved = 0u64;
        for (i, &(bucket, dir)) in dirs.iter().enumerate() {
            let last_dir = i + 1 == dirs.len();
            let mut offset = 0u64;
            loop {
                let scan = self.shared.dir_index.scan(dir, offset, budget)?;
                let page_len = scan.entries.len();
                let entries: Vec<EntryRecord> = scan
                    .entries
                    .into_iter()
                    .map(|(name, value)| EntryRecord {
                        parent: dir,
                        name,
                        inode: value.inode,
                        stat: value.stat,
                    })
                    .collect();
                let is_more = scan.is_more || !last_dir;
                let cursor = EntryCursor {
                    bucket,
                    parent: dir,
                    offset: scan.next_offset,
                };
                let req = Request::SendShardEntries(SendShardEntriesReq {
                    shard_id: *child.id,
                    is_more,
                    cursor,
                    entries,
                });
                match self.transport.call(target, &req)? {
                    Response::SendShardEntries(rsp) if rsp.status == RespStatus::Success => {}
                    other => return Err(bug(format!("send-entries rejected: {:?}", other))),
                }
                moved += page_len as u64;
                debug!(child = %child.id, dir, page_len, "bulk copy page shipped");
                if !scan.is_more {
                    break;
                }
                offset = scan.next_offset;
            }
        }
        Ok(moved)
    }

    /// Replay the migration log from id 0 in byte-budgeted batches. Once the
    /// backlog falls under the low-water mark, publish the narrowed ranges;
    /// keep shipping until the target confirms the final batch.
    fn ship_logs(&self, parent: &Arc<Shard>, child: &Arc<Shard>, target: u32) -> Result<Void> {
        let budget = self.shared.config.wire_byte_budget;
        let low_water = self.shared.config.log_almost_done_threshold;
        let mut next: u32 = 0;
        loop {
            let scan = self.shared.log_store.scan_from(*parent.id, next, budget)?;
            let shipped_through = scan.next_log_id as u64;

            if parent.status() == ShardStatus::IsSplit
                && !scan.is_more
                && parent.log_cursor().saturating_sub(shipped_through) <= low_water
            {
                self.publish_ranges(parent, child)?;
            }

            // Requests admitted under the wide range may still append after
            // publication; the drain ends once an exhausted scan has shipped
            // everything up to the assignment cursor.
            let done = parent.status() == ShardStatus::SplitAlmostDone
                && !scan.is_more
                && shipped_through >= parent.log_cursor();
            let log_status = if done {
                LogStatus::Done
            } else if parent.status() == ShardStatus::SplitAlmostDone {
                LogStatus::AlmostDone
            } else {
                LogStatus::FarToDone
            };

            let count = scan.records.len() as u32;
            let mut entries = Vec::new();
            for (_, record) in &scan.records {
                entries.extend_from_slice(record);
            }
            let req = Request::SendShardLog(SendShardLogReq {
                shard_id: *child.id,
                log_status,
                next_log_id: scan.next_log_id,
                count,
                entries,
            });
            let rsp = match self.transport.call(target, &req)? {
                Response::SendShardLog(rsp) if rsp.status == RespStatus::Success => rsp,
                other => return Err(bug(format!("send-log rejected: {:?}", other))),
            };
            debug!(
                parent = %parent.id,
                child = %child.id,
                count,
                applied_through = rsp.next_log_id,
                ?log_status,
                "log batch shipped"
            );
            if done && rsp.next_log_id >= scan.next_log_id {
                return Ok(());
            }
            // the target answers with its applied watermark; rewind if it is
            // behind what we just sent
            next = rsp.next_log_id.min(scan.next_log_id);
        }
    }

    /// Narrow the parent's served range, flip it to `SplitAlmostDone`, and
    /// publish both ranges in the directory under its write lock. The shard
    /// range narrows first so no handed-off key can slip past unlogged.
    fn publish_ranges(&self, parent: &Arc<Shard>, child: &Arc<Shard>) -> Result<Void> {
        let new_end = child.start_key() - 1;
        parent.set_end_key(new_end);
        parent.apply_event(ShardEvent::RangesPublished)?;
        self.shared.global_dir.publish_split(
            *parent.id,
            new_end,
            ShardDescriptor::new(*child.id, child.start_key(), child.end_key()),
        );
        info!(
            parent = %parent.id,
            child = %child.id,
            parent_range = ?(parent.start_key(), new_end),
            child_range = ?(child.start_key(), child.end_key()),
            "split ranges published"
        );
        Ok(())
    }
}

fn bug(msg: String) -> Status {
    Status::with_message(StatusCode::FOUND_BUG, msg)
}

/// Spawn the coordinator thread. Dropping the returned handle aborts the
/// loop and joins it.
pub struct CoordinatorHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn spawn(coordinator: SplitCoordinator) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("split-coordinator".to_string())
            .spawn(move || coordinator.run(&flag))
            .expect("spawn coordinator thread");
        Self {
            shutdown,
            thread: Some(thread),
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
