//! Client-side routing: the shard map cache and the operation API with the
//! staleness/busy retry protocol.

mod client;
mod router;

pub use client::MetaClient;
pub use router::ShardRouter;
