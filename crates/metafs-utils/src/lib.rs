pub mod jump_hash;
pub mod routing_hash;

pub use jump_hash::{jump_consistent_hash, server_slot_for_shard};
pub use routing_hash::{fmix64, routing_bucket};
