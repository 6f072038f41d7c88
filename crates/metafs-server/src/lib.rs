//! Metadata server core: shard partitioning, live splits, and cross-server
//! migration.

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod migration_log;
pub mod node;
pub mod service;
pub mod shard;
pub mod split_queue;
pub mod worker;

pub use config::ServerConfig;
pub use coordinator::{CoordinatorHandle, SplitCoordinator};
pub use directory::GlobalShardDirectory;
pub use node::MetaNode;
pub use shard::{Shard, ShardEvent, ShardStatus};
pub use split_queue::{PendingSplitTask, SplitTaskQueue};
pub use worker::{NodeShared, WorkerContext};
