//! Storage seams consumed by the metadata service: a directory-entry index
//! and a migration log store, plus in-memory engines backing both.

mod dir_index;
mod log_store;
mod mem;

pub use dir_index::{DirIndex, DirScan, EntryValue};
pub use log_store::{LogScan, LogStore};
pub use mem::{MemDirIndex, MemLogStore};
