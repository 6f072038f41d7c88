//! End-to-end tests over an in-process cluster: filesystem operations, a
//! full live split with cross-server migration, client map staleness, and
//! the server-to-server transfer protocol driven directly.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;

use metafs_client::MetaClient;
use metafs_kv::{DirIndex, LogStore, MemDirIndex, MemLogStore};
use metafs_net::{Loopback, RequestHandler, Transport};
use metafs_proto::*;
use metafs_server::directory::ranges_partition_key_space;
use metafs_server::migration_log::LogRecord;
use metafs_server::{MetaNode, ServerConfig, ShardEvent, ShardStatus};
use metafs_types::{ClientId, ShardCode, ShardId, ROOT_INODE};
use metafs_utils::routing_bucket;

const FILE_MODE: u32 = 0o100644;
const DIR_MODE: u32 = 0o040755;

struct Cluster {
    nodes: Vec<Arc<MetaNode>>,
    transport: Arc<dyn Transport>,
    key_space: u64,
}

impl Cluster {
    /// One node per session, one worker each, 512 buckets per bootstrap
    /// shard, wired together over the loopback transport.
    fn new(sessions: u32, split_threshold: u64) -> Self {
        let nodes: Vec<Arc<MetaNode>> = (0..sessions)
            .map(|slot| {
                let config = ServerConfig {
                    server_slot: slot,
                    num_sessions: sessions,
                    hash_range: 512,
                    split_threshold,
                    log_almost_done_threshold: 4,
                    wire_byte_budget: 512,
                    ..Default::default()
                };
                Arc::new(
                    MetaNode::new(
                        config,
                        Arc::new(MemDirIndex::new()),
                        Arc::new(MemLogStore::new()),
                    )
                    .unwrap(),
                )
            })
            .collect();
        let handlers: Vec<Arc<dyn RequestHandler>> = nodes
            .iter()
            .map(|node| Arc::clone(node) as Arc<dyn RequestHandler>)
            .collect();
        Self {
            nodes,
            transport: Arc::new(Loopback::new(handlers)),
            key_space: sessions as u64 * 512,
        }
    }

    fn client(&self, id: u32) -> MetaClient {
        MetaClient::new(Arc::clone(&self.transport), ClientId(id), self.key_space, 1).unwrap()
    }

    /// Drain every node's split queue synchronously.
    fn run_coordinators(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| {
                node.coordinator(Arc::clone(&self.transport))
                    .run_pending()
                    .unwrap()
            })
            .sum()
    }

    fn call(&self, session: u32, req: Request) -> Response {
        self.transport.call(session, &req).unwrap()
    }
}

/// First `count` directory inode ids at or above `from` whose routing
/// buckets fall in `[start, end]`.
fn parents_in_bucket_range(key_space: u64, start: u64, end: u64, from: u64, count: usize) -> Vec<u64> {
    (from..)
        .filter(|&p| {
            let bucket = routing_bucket(p, key_space);
            start <= bucket && bucket <= end
        })
        .take(count)
        .collect()
}

#[test]
fn test_namespace_ops_single_node() {
    let cluster = Cluster::new(1, 1_000_000);
    let client = cluster.client(1);

    let dir = client.mkdir(ROOT_INODE, "projects", DIR_MODE).unwrap();
    let (file, stat) = client.mknod(dir, "notes.txt", FILE_MODE).unwrap();
    assert_eq!(stat.mode, FILE_MODE);
    assert_ne!(file, dir);

    // lookups see the new entries
    assert_eq!(client.get_inode(ROOT_INODE, "projects").unwrap(), dir);
    let (found, _) = client.stat(dir, "notes.txt").unwrap();
    assert_eq!(found, file);

    // duplicate create
    let err = client.mknod(dir, "notes.txt", FILE_MODE).unwrap_err();
    assert_eq!(err.code(), ShardCode::EXISTS);

    // write open refreshes, read open answers the same inode
    let (opened, _) = client.open(dir, "notes.txt", 1).unwrap();
    assert_eq!(opened, file);
    let (opened, _) = client.open(dir, "notes.txt", 0).unwrap();
    assert_eq!(opened, file);

    // wrong-kind removals
    assert_eq!(
        client.unlink(ROOT_INODE, "projects").unwrap_err().code(),
        ShardCode::IS_DIRECTORY
    );
    assert_eq!(
        client.rmdir(dir, "notes.txt").unwrap_err().code(),
        ShardCode::NOT_DIRECTORY
    );
    assert_eq!(
        client.rmdir(ROOT_INODE, "projects").unwrap_err().code(),
        ShardCode::NOT_EMPTY
    );

    client.unlink(dir, "notes.txt").unwrap();
    assert_eq!(
        client.stat(dir, "notes.txt").unwrap_err().code(),
        ShardCode::NOT_FOUND
    );
    client.rmdir(ROOT_INODE, "projects").unwrap();
    assert_eq!(
        client.get_inode(ROOT_INODE, "projects").unwrap_err().code(),
        ShardCode::NOT_FOUND
    );
}

#[test]
fn test_readdir_pages_through_large_directory() {
    let cluster = Cluster::new(1, 1_000_000);
    let client = cluster.client(1);

    let dir = client.mkdir(ROOT_INODE, "bulk", DIR_MODE).unwrap();
    let mut expected = Vec::new();
    for i in 0..40 {
        let name = format!("entry-with-a-longish-name-{:03}", i);
        let (inode, _) = client.mknod(dir, &name, FILE_MODE).unwrap();
        expected.push((name, inode));
    }

    // budget of 512 bytes forces several pages
    let listed = client.readdir(dir).unwrap();
    assert_eq!(listed.len(), expected.len());
    for (entry, (name, inode)) in listed.iter().zip(&expected) {
        assert_eq!(&entry.name, name);
        assert_eq!(entry.inode, *inode);
    }
}

#[test]
fn test_split_preserves_every_entry() {
    let cluster = Cluster::new(2, 8);
    let client = cluster.client(1);

    // enough directories on each bootstrap shard to push both over the
    // threshold, inserted in shuffled order
    let mut parents = parents_in_bucket_range(1024, 0, 511, 1000, 12);
    parents.extend(parents_in_bucket_range(1024, 512, 1023, 1000, 12));
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    parents.shuffle(&mut rng);

    let mut created = Vec::new();
    for &parent in &parents {
        let (inode, _) = client.mknod(parent, "payload", FILE_MODE).unwrap();
        created.push((parent, inode));
    }

    let ran = cluster.run_coordinators();
    assert_eq!(ran, 2, "both bootstrap shards should have split");

    // every node's published directory still partitions the key space
    for node in &cluster.nodes {
        let snapshot = node.shared().global_dir.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(ranges_partition_key_space(&snapshot, 1024));
    }

    // a fresh client finds every entry where the new map says it lives
    let fresh = cluster.client(2);
    for &(parent, inode) in &created {
        let (found, _) = fresh.stat(parent, "payload").unwrap();
        assert_eq!(found, inode, "entry under parent {} moved or lost", parent);
        let listing = fresh.readdir(parent).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].inode, inode);
    }

    // mutations keep working on migrated ranges
    let (victim, _) = created[3];
    fresh.unlink(victim, "payload").unwrap();
    assert_eq!(
        fresh.stat(victim, "payload").unwrap_err().code(),
        ShardCode::NOT_FOUND
    );
    let (other, other_inode) = created[4];
    assert_eq!(fresh.stat(other, "payload").unwrap().0, other_inode);
}

#[test]
fn test_stale_client_refetches_after_split() {
    let cluster = Cluster::new(2, 8);
    // this client caches the two-shard bootstrap map
    let stale = cluster.client(1);

    // fill only the first bootstrap shard so exactly it splits; make sure
    // some directories land in the handed-off upper half [256, 511]
    let mut parents = parents_in_bucket_range(1024, 0, 255, 2000, 6);
    let moved = parents_in_bucket_range(1024, 256, 511, 2000, 6);
    parents.extend(&moved);

    let mut created = Vec::new();
    for &parent in &parents {
        let (inode, _) = stale.mknod(parent, "f", FILE_MODE).unwrap();
        created.push((parent, inode));
    }
    assert_eq!(cluster.run_coordinators(), 1);

    // the cached map still routes the moved bucket to the old shard; the
    // server answers stale-routing and the client recovers transparently
    let inode = created
        .iter()
        .find(|(parent, _)| *parent == moved[0])
        .unwrap()
        .1;
    let (found, _) = stale.stat(moved[0], "f").unwrap();
    assert_eq!(found, inode);
}

#[test]
fn test_not_ready_shard_answers_busy() {
    let cluster = Cluster::new(2, 1_000_000);
    let rsp = cluster.call(
        1,
        Request::CreateShard(CreateShardReq {
            shard_id: 100,
            start_key: 768,
            end_key: 1023,
        }),
    );
    assert_eq!(rsp.status(), RespStatus::Success);

    let parent = parents_in_bucket_range(1024, 768, 1023, 3000, 1)[0];
    let rsp = cluster.call(
        1,
        Request::Mknod(MknodReq {
            shard_id: 100,
            parent,
            bucket: routing_bucket(parent, 1024),
            mode: FILE_MODE,
            name: "early".to_string(),
        }),
    );
    assert_eq!(rsp.status(), RespStatus::Busy);
    // the refused write left no trace
    let stored = cluster.nodes[1]
        .shared()
        .dir_index
        .get(parent, "early")
        .unwrap();
    assert!(stored.is_none());
}

#[test]
fn test_create_shard_is_replay_safe() {
    let cluster = Cluster::new(2, 1_000_000);
    let req = Request::CreateShard(CreateShardReq {
        shard_id: 100,
        start_key: 768,
        end_key: 1023,
    });
    assert_eq!(cluster.call(1, req.clone()).status(), RespStatus::Success);
    assert_eq!(cluster.call(1, req).status(), RespStatus::Success);
    let shard = cluster.nodes[1].workers()[0].shard(ShardId(100)).unwrap();
    assert_eq!(shard.status(), ShardStatus::NotReady);
}

#[test]
fn test_bulk_copy_batch_replay_is_idempotent() {
    let cluster = Cluster::new(2, 1_000_000);
    cluster.call(
        1,
        Request::CreateShard(CreateShardReq {
            shard_id: 100,
            start_key: 768,
            end_key: 1023,
        }),
    );

    let dirs = parents_in_bucket_range(1024, 768, 1023, 3000, 2);
    let entries: Vec<EntryRecord> = dirs
        .iter()
        .enumerate()
        .map(|(i, &parent)| EntryRecord {
            parent,
            name: format!("copied-{}", i),
            inode: 10 + i as u64,
            stat: StatRecord {
                mode: FILE_MODE,
                ..Default::default()
            },
        })
        .collect();
    let req = Request::SendShardEntries(SendShardEntriesReq {
        shard_id: 100,
        is_more: true,
        cursor: EntryCursor {
            bucket: routing_bucket(dirs[0], 1024),
            parent: dirs[0],
            offset: 2,
        },
        entries,
    });

    // the origin resends a batch after a lost acknowledgement
    assert_eq!(cluster.call(1, req.clone()).status(), RespStatus::Success);
    assert_eq!(cluster.call(1, req).status(), RespStatus::Success);

    let shard = cluster.nodes[1].workers()[0].shard(ShardId(100)).unwrap();
    assert_eq!(shard.element_count(), 2);
    let stored = cluster.nodes[1]
        .shared()
        .dir_index
        .get(dirs[0], "copied-0")
        .unwrap()
        .unwrap();
    assert_eq!(stored.inode, 10);
}

#[test]
fn test_log_replay_watermark_and_filter() {
    let cluster = Cluster::new(2, 1_000_000);
    cluster.call(
        1,
        Request::CreateShard(CreateShardReq {
            shard_id: 100,
            start_key: 768,
            end_key: 1023,
        }),
    );
    let node = &cluster.nodes[1];
    let shard = node.workers()[0].shard(ShardId(100)).unwrap();

    let in_range = parents_in_bucket_range(1024, 768, 1023, 4000, 2);
    let (pa, pb) = (in_range[0], in_range[1]);
    let px = parents_in_bucket_range(1024, 0, 767, 4000, 1)[0];

    let put = |parent: u64, name: &str, inode: u64| LogRecord::Put {
        parent,
        name: name.to_string(),
        inode,
        stat: StatRecord {
            mode: FILE_MODE,
            ..Default::default()
        },
    };
    // log ids 0..4 as the origin would assign them
    let records = [
        put(pa, "a", 11),
        put(pb, "b", 12),
        put(px, "x", 13), // hashes outside the target range
        LogRecord::Delete {
            parent: pa,
            name: "a".to_string(),
        },
    ];
    let batch = |ids: std::ops::Range<usize>, log_status: LogStatus| {
        let mut entries = Vec::new();
        for record in &records[ids.clone()] {
            entries.extend_from_slice(&record.encode().unwrap());
        }
        Request::SendShardLog(SendShardLogReq {
            shard_id: 100,
            log_status,
            next_log_id: ids.end as u32,
            count: ids.len() as u32,
            entries,
        })
    };

    // a batch ahead of the watermark is refused with a rewind to 0
    let rsp = cluster.call(1, batch(2..4, LogStatus::FarToDone));
    match rsp {
        Response::SendShardLog(r) => {
            assert_eq!(r.status, RespStatus::Success);
            assert_eq!(r.next_log_id, 0);
        }
        other => panic!("unexpected response {:?}", other),
    }
    assert!(node.shared().dir_index.get(pa, "a").unwrap().is_none());

    // in-order batch applies and advances the watermark
    let rsp = cluster.call(1, batch(0..2, LogStatus::FarToDone));
    match rsp {
        Response::SendShardLog(r) => assert_eq!(r.next_log_id, 2),
        other => panic!("unexpected response {:?}", other),
    }
    assert_eq!(node.shared().dir_index.get(pa, "a").unwrap().unwrap().inode, 11);
    assert_eq!(node.shared().dir_index.get(pb, "b").unwrap().unwrap().inode, 12);
    assert_eq!(shard.element_count(), 2);

    // a duplicate of the applied batch is skipped entirely
    let rsp = cluster.call(1, batch(0..2, LogStatus::FarToDone));
    match rsp {
        Response::SendShardLog(r) => assert_eq!(r.next_log_id, 2),
        other => panic!("unexpected response {:?}", other),
    }
    assert_eq!(shard.element_count(), 2);

    // final batch: the out-of-range put is filtered, the delete lands, and
    // the done marker promotes the shard
    let rsp = cluster.call(1, batch(2..4, LogStatus::Done));
    match rsp {
        Response::SendShardLog(r) => assert_eq!(r.next_log_id, 4),
        other => panic!("unexpected response {:?}", other),
    }
    assert!(node.shared().dir_index.get(px, "x").unwrap().is_none());
    assert!(node.shared().dir_index.get(pa, "a").unwrap().is_none());
    assert_eq!(shard.element_count(), 1);
    assert_eq!(shard.status(), ShardStatus::Normal);

    // promotion published the child and narrowed whoever covered its range
    let snapshot = node.shared().global_dir.snapshot();
    assert!(ranges_partition_key_space(&snapshot, 1024));
    assert!(snapshot.iter().any(|d| d.id == 100 && d.start_key == 768));
}

#[test]
fn test_mutation_on_published_shard_still_logged() {
    let cluster = Cluster::new(1, 1_000_000);
    let node = &cluster.nodes[0];
    let shard = node.workers()[0].shard(ShardId(0)).unwrap();

    // drive the shard to the published state by hand: range narrowed,
    // status flipped, catch-up not yet complete
    assert!(shard.try_begin_split());
    shard.set_end_key(255);
    shard.apply_event(ShardEvent::RangesPublished).unwrap();

    // a write to the retained range lands while the split is publishing;
    // it must be appended to the migration log, not just acknowledged
    let parent = parents_in_bucket_range(512, 0, 255, 6000, 1)[0];
    let rsp = cluster.call(
        0,
        Request::Mknod(MknodReq {
            shard_id: 0,
            parent,
            bucket: routing_bucket(parent, 512),
            mode: FILE_MODE,
            name: "late".to_string(),
        }),
    );
    assert_eq!(rsp.status(), RespStatus::Success);

    let scan = node.shared().log_store.scan_from(0, 0, 4096).unwrap();
    assert_eq!(scan.records.len(), 1);
    let mut offset = 0;
    match LogRecord::decode(&scan.records[0].1, &mut offset).unwrap() {
        LogRecord::Put { parent: p, name, .. } => {
            assert_eq!(p, parent);
            assert_eq!(name, "late");
        }
        other => panic!("unexpected record {:?}", other),
    }
}

#[test]
fn test_split_then_further_growth_splits_again() {
    let cluster = Cluster::new(2, 8);
    let client = cluster.client(1);

    // first wave splits shard 0
    for parent in parents_in_bucket_range(1024, 0, 511, 5000, 12) {
        client.mknod(parent, "wave1", FILE_MODE).unwrap();
    }
    assert_eq!(cluster.run_coordinators(), 1);

    // second wave grows the narrowed parent past the threshold again
    for parent in parents_in_bucket_range(1024, 0, 255, 9000, 12) {
        client.mknod(parent, "wave2", FILE_MODE).unwrap();
    }
    assert_eq!(cluster.run_coordinators(), 1);

    for node in &cluster.nodes {
        assert!(ranges_partition_key_space(
            &node.shared().global_dir.snapshot(),
            1024
        ));
    }
}
