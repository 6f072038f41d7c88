//! Wire protocol for the metadata service: the codec, shard descriptors,
//! and the tagged request/response messages.

#[macro_use]
pub mod wire;

pub mod messages;
pub mod shard;

pub use messages::*;
pub use shard::*;
pub use wire::{WireDeserialize, WireError, WireSerialize};
