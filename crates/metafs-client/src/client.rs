use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;
use tracing::debug;

use metafs_net::Transport;
use metafs_proto::*;
use metafs_types::{
    make_error_msg, ClientId, Result, ShardCode, StatusCode, Void,
};
use metafs_utils::{routing_bucket, server_slot_for_shard};

use crate::router::ShardRouter;

/// Metadata client: routes each operation to the shard owning its key and
/// reacts to staleness signals.
///
/// A stale-routing response triggers one wholesale directory refetch and one
/// retry. A busy response yields the scheduler and retries with no bound.
pub struct MetaClient {
    transport: Arc<dyn Transport>,
    client_id: ClientId,
    router: RwLock<ShardRouter>,
    key_space: u64,
    workers_per_server: u32,
}

impl MetaClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        client_id: ClientId,
        key_space: u64,
        workers_per_server: u32,
    ) -> Result<Self> {
        let client = Self {
            transport,
            client_id,
            router: RwLock::new(ShardRouter::new()),
            key_space,
            workers_per_server,
        };
        client.refresh_shard_map()?;
        Ok(client)
    }

    pub fn bucket_of(&self, parent: u64) -> u64 {
        routing_bucket(parent, self.key_space)
    }

    /// Refetch the whole shard directory from one server.
    pub fn refresh_shard_map(&self) -> Result<Void> {
        let session = *self.client_id % self.transport.num_sessions();
        let req = Request::ReadShardMap(ReadShardMapReq {
            client_id: *self.client_id,
        });
        match self.transport.call(session, &req)? {
            Response::ReadShardMap(rsp) if rsp.status == RespStatus::Success => {
                debug!(shards = rsp.shards.len(), "shard map refreshed");
                self.router.write().update(rsp.shards);
                Ok(())
            }
            other => make_error_msg(
                StatusCode::UNKNOWN,
                format!("read-shard-map answered {:?}", other.status()),
            ),
        }
    }

    pub fn shard_map(&self) -> Result<Vec<ShardDescriptor>> {
        let session = *self.client_id % self.transport.num_sessions();
        let req = Request::ReadShardMap(ReadShardMapReq {
            client_id: *self.client_id,
        });
        match self.transport.call(session, &req)? {
            Response::ReadShardMap(rsp) if rsp.status == RespStatus::Success => Ok(rsp.shards),
            other => make_error_msg(
                StatusCode::UNKNOWN,
                format!("read-shard-map answered {:?}", other.status()),
            ),
        }
    }

    fn resolve(&self, bucket: u64) -> Result<ShardDescriptor> {
        if let Some(desc) = self.router.read().resolve(bucket) {
            return Ok(desc.clone());
        }
        self.refresh_shard_map()?;
        match self.router.read().resolve(bucket) {
            Some(desc) => Ok(desc.clone()),
            None => make_error_msg(
                ShardCode::UNKNOWN_SHARD,
                format!("no shard owns bucket {}", bucket),
            ),
        }
    }

    /// Send one operation, following the staleness protocol.
    fn call_routed(&self, bucket: u64, build: impl Fn(u32) -> Request) -> Result<Response> {
        let mut refreshed = false;
        loop {
            let shard = self.resolve(bucket)?;
            let session = server_slot_for_shard(
                shard.id,
                self.transport.num_sessions(),
                self.workers_per_server,
            );
            let rsp = self.transport.call(session, &build(shard.id))?;
            match rsp.status() {
                RespStatus::Busy => {
                    // target mid-handoff; retry with no bound
                    thread::yield_now();
                }
                RespStatus::StaleRouting => {
                    if refreshed {
                        return make_error_msg(
                            ShardCode::STALE_ROUTING,
                            format!("still stale after refetch, bucket {}", bucket),
                        );
                    }
                    debug!(bucket, shard = shard.id, "stale routing, refetching shard map");
                    self.refresh_shard_map()?;
                    refreshed = true;
                }
                _ => return Ok(rsp),
            }
        }
    }

    pub fn mknod(&self, parent: u64, name: &str, mode: u32) -> Result<(u64, StatRecord)> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Mknod(MknodReq {
                shard_id,
                parent,
                bucket,
                mode,
                name: name.to_string(),
            })
        })?;
        match rsp {
            Response::Mknod(r) if r.status == RespStatus::Success => Ok((r.inode, r.stat)),
            other => op_error(other.status()),
        }
    }

    pub fn mkdir(&self, parent: u64, name: &str, mode: u32) -> Result<u64> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Mkdir(MkdirReq {
                shard_id,
                parent,
                bucket,
                mode,
                name: name.to_string(),
            })
        })?;
        match rsp {
            Response::Mkdir(r) if r.status == RespStatus::Success => Ok(r.inode),
            other => op_error(other.status()),
        }
    }

    pub fn open(&self, parent: u64, name: &str, mode: u32) -> Result<(u64, StatRecord)> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Open(OpenReq {
                shard_id,
                parent,
                bucket,
                mode,
                name: name.to_string(),
            })
        })?;
        match rsp {
            Response::Open(r) if r.status == RespStatus::Success => Ok((r.inode, r.stat)),
            other => op_error(other.status()),
        }
    }

    pub fn stat(&self, parent: u64, name: &str) -> Result<(u64, StatRecord)> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Stat(StatReq {
                shard_id,
                parent,
                bucket,
                name: name.to_string(),
            })
        })?;
        match rsp {
            Response::Stat(r) if r.status == RespStatus::Success => Ok((r.inode, r.stat)),
            other => op_error(other.status()),
        }
    }

    pub fn get_inode(&self, parent: u64, name: &str) -> Result<u64> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::GetInode(GetInodeReq {
                shard_id,
                parent,
                bucket,
                name: name.to_string(),
            })
        })?;
        match rsp {
            Response::GetInode(r) if r.status == RespStatus::Success => Ok(r.inode),
            other => op_error(other.status()),
        }
    }

    pub fn unlink(&self, parent: u64, name: &str) -> Result<Void> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Unlink(UnlinkReq {
                shard_id,
                parent,
                bucket,
                name: name.to_string(),
            })
        })?;
        match rsp.status() {
            RespStatus::Success => Ok(()),
            status => op_error(status),
        }
    }

    pub fn rmdir(&self, parent: u64, name: &str) -> Result<Void> {
        let bucket = self.bucket_of(parent);
        let rsp = self.call_routed(bucket, |shard_id| {
            Request::Rmdir(RmdirReq {
                shard_id,
                parent,
                bucket,
                name: name.to_string(),
            })
        })?;
        match rsp.status() {
            RespStatus::Success => Ok(()),
            status => op_error(status),
        }
    }

    /// Read a whole directory, following the paging cursor.
    pub fn readdir(&self, dir: u64) -> Result<Vec<DirEntryRecord>> {
        let bucket = self.bucket_of(dir);
        let mut entries = Vec::new();
        let mut offset = 0u64;
        loop {
            let rsp = self.call_routed(bucket, |shard_id| {
                Request::Readdir(ReaddirReq {
                    shard_id,
                    dir,
                    bucket,
                    offset,
                })
            })?;
            let page = match rsp {
                Response::Readdir(r) if r.status == RespStatus::Success => r,
                other => return op_error(other.status()),
            };
            entries.extend(page.entries);
            if !page.is_more {
                return Ok(entries);
            }
            offset = page.next_offset;
        }
    }
}

fn op_error<T>(status: RespStatus) -> Result<T> {
    let code = match status {
        RespStatus::NotFound => ShardCode::NOT_FOUND,
        RespStatus::Exists => ShardCode::EXISTS,
        RespStatus::NotDirectory => ShardCode::NOT_DIRECTORY,
        RespStatus::IsDirectory => ShardCode::IS_DIRECTORY,
        RespStatus::NotEmpty => ShardCode::NOT_EMPTY,
        RespStatus::StaleRouting => ShardCode::STALE_ROUTING,
        RespStatus::Busy => ShardCode::BUSY,
        _ => StatusCode::UNKNOWN,
    };
    make_error_msg(code, format!("server answered {:?}", status))
}
