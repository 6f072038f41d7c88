use metafs_types::{Result, Void};

/// One page of a forward log scan.
#[derive(Debug, Clone)]
pub struct LogScan {
    /// `(log_id, record bytes)` pairs in log-id order.
    pub records: Vec<(u32, Vec<u8>)>,
    /// First log id not included in this page.
    pub next_log_id: u32,
    pub is_more: bool,
}

/// Append-only migration log keyed by `(shard_id, log_id)`.
pub trait LogStore: Send + Sync {
    fn append(&self, shard_id: u32, log_id: u32, record: Vec<u8>) -> Result<Void>;

    /// Read records of `shard_id` with log id >= `from_log_id`, stopping once
    /// the accumulated record bytes would exceed `byte_budget`. At least one
    /// record is returned if any remain.
    fn scan_from(&self, shard_id: u32, from_log_id: u32, byte_budget: usize) -> Result<LogScan>;

    /// Drop all records of `shard_id`. Called once a handoff completes.
    fn truncate(&self, shard_id: u32) -> Result<Void>;
}
