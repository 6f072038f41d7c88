use metafs_proto::StatRecord;
use metafs_types::Result;

/// Value stored per directory entry: the entry's inode plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryValue {
    pub inode: u64,
    pub stat: StatRecord,
}

/// One page of a resumable range scan over a directory.
#[derive(Debug, Clone)]
pub struct DirScan {
    /// Entry names with their values, in scan order.
    pub entries: Vec<(String, EntryValue)>,
    /// Offset to pass to the next scan call when `is_more`.
    pub next_offset: u64,
    pub is_more: bool,
}

/// Directory-entry index keyed by `(parent inode, entry name)`.
///
/// Point operations plus a resumable range scan. The scan offset is an
/// opaque position owned by the implementation; callers only ever feed back
/// the `next_offset` a previous scan returned.
pub trait DirIndex: Send + Sync {
    fn get(&self, parent: u64, name: &str) -> Result<Option<EntryValue>>;

    /// Insert a new entry. Returns `false` without modifying anything if the
    /// entry already exists.
    fn insert(&self, parent: u64, name: &str, value: EntryValue) -> Result<bool>;

    /// Insert or overwrite. Migration replay uses this so re-applied records
    /// stay idempotent.
    fn upsert(&self, parent: u64, name: &str, value: EntryValue) -> Result<()>;

    /// Remove an entry. Returns `false` if it was not present.
    fn remove(&self, parent: u64, name: &str) -> Result<bool>;

    /// Scan entries of `parent` starting at `offset`, stopping once the
    /// accumulated entry bytes would exceed `byte_budget`. At least one entry
    /// is returned if any remain, regardless of budget.
    fn scan(&self, parent: u64, offset: u64, byte_budget: usize) -> Result<DirScan>;

    /// Whether the directory has no entries. Used by rmdir.
    fn is_empty_dir(&self, parent: u64) -> Result<bool>;
}
