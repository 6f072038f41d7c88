strong_type!(ShardId, u32);
strong_type!(WorkerId, u32);
strong_type!(InodeId, u64);
strong_type!(ClientId, u32);

/// High bit of an inode id marks a directory.
pub const INODE_DIR_BIT: u64 = 1 << 63;

/// Inode of the filesystem root directory.
pub const ROOT_INODE: u64 = INODE_DIR_BIT | 1;

impl InodeId {
    /// Whether this inode id names a directory.
    pub fn is_directory(self) -> bool {
        self.0 & INODE_DIR_BIT != 0
    }
}
