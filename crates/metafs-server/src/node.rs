//! Server process assembly: workers, bootstrap shards, request dispatch.

use std::sync::Arc;

use metafs_kv::{DirIndex, LogStore};
use metafs_net::{RequestHandler, Transport};
use metafs_proto::{Request, Response, ShardDescriptor};
use metafs_types::{Result, ShardId, Status, WorkerId};

use crate::config::ServerConfig;
use crate::coordinator::SplitCoordinator;
use crate::service::MetaService;
use crate::shard::{Shard, ShardStatus};
use crate::worker::{NodeShared, WorkerContext};

/// One metadata server. Owns the workers for its slot, the shared node
/// state, and the op handlers.
pub struct MetaNode {
    shared: Arc<NodeShared>,
    workers: Vec<Arc<WorkerContext>>,
    service: MetaService,
}

impl MetaNode {
    pub fn new(
        config: ServerConfig,
        dir_index: Arc<dyn DirIndex>,
        log_store: Arc<dyn LogStore>,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(NodeShared::new(config, dir_index, log_store));
        let config = &shared.config;
        let workers: Vec<Arc<WorkerContext>> = (0..config.workers_per_server)
            .map(|w| Arc::new(WorkerContext::new(WorkerId(w), Arc::clone(&shared))))
            .collect();

        // Every server starts from the same statically derived layout: one
        // shard per worker slot cluster-wide, each covering hash_range keys.
        for id in 0..config.bootstrap_shards() {
            let start = id as u64 * config.hash_range;
            let end = start + config.hash_range - 1;
            shared
                .global_dir
                .insert(ShardDescriptor::new(id, start, end));
            if shared.target_slot_for(ShardId(id)) == config.server_slot {
                let worker = &workers[(id % config.workers_per_server) as usize];
                worker.register_shard(Arc::new(Shard::new(
                    ShardId(id),
                    start,
                    end,
                    ShardStatus::Normal,
                )));
            }
        }

        let service = MetaService::new(Arc::clone(&shared));
        Ok(Self {
            shared,
            workers,
            service,
        })
    }

    pub fn shared(&self) -> &Arc<NodeShared> {
        &self.shared
    }

    pub fn workers(&self) -> &[Arc<WorkerContext>] {
        &self.workers
    }

    /// Build this node's split coordinator over the given transport.
    pub fn coordinator(&self, transport: Arc<dyn Transport>) -> SplitCoordinator {
        SplitCoordinator::new(Arc::clone(&self.shared), self.workers.clone(), transport)
    }

    fn worker_for_shard(&self, shard_id: u32) -> &WorkerContext {
        &self.workers[(shard_id % self.shared.config.workers_per_server) as usize]
    }
}

/// Recoverable conditions travel inside responses; an `Err` out of a handler
/// is a broken invariant and aborts the process.
fn fatal<T>(result: Result<T>) -> T {
    result.unwrap_or_else(|status: Status| panic!("fatal metadata error: {}", status))
}

impl RequestHandler for MetaNode {
    fn handle(&self, req: Request) -> Response {
        match req {
            Request::Open(r) => {
                Response::Open(fatal(self.service.open(self.worker_for_shard(r.shard_id), &r)))
            }
            Request::Unlink(r) => Response::Unlink(fatal(
                self.service.unlink(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::Stat(r) => {
                Response::Stat(fatal(self.service.stat(self.worker_for_shard(r.shard_id), &r)))
            }
            Request::Mknod(r) => Response::Mknod(fatal(
                self.service.mknod(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::Readdir(r) => Response::Readdir(fatal(
                self.service.readdir(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::Mkdir(r) => Response::Mkdir(fatal(
                self.service.mkdir(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::Rmdir(r) => Response::Rmdir(fatal(
                self.service.rmdir(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::GetInode(r) => Response::GetInode(fatal(
                self.service.get_inode(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::ReadShardMap(r) => Response::ReadShardMap(self.service.read_shard_map(&r)),
            Request::CreateShard(r) => Response::CreateShard(
                self.service
                    .create_shard(self.worker_for_shard(r.shard_id), &r),
            ),
            Request::SendShardEntries(r) => Response::SendShardEntries(fatal(
                self.service
                    .send_shard_entries(self.worker_for_shard(r.shard_id), &r),
            )),
            Request::SendShardLog(r) => Response::SendShardLog(fatal(
                self.service
                    .send_shard_log(self.worker_for_shard(r.shard_id), &r),
            )),
        }
    }
}
