//! Shard descriptors and the records that cross the wire during migration.

use crate::wire_struct;

wire_struct! {
    /// Client- and directory-visible projection of a shard: its id and the
    /// inclusive routing key range it owns. No counters, no status.
    pub struct ShardDescriptor {
        pub id: u32,
        pub start_key: u64,
        pub end_key: u64,
    }
}

impl ShardDescriptor {
    pub fn new(id: u32, start_key: u64, end_key: u64) -> Self {
        Self {
            id,
            start_key,
            end_key,
        }
    }

    /// Whether this shard owns the given routing key bucket. Both range
    /// endpoints are inclusive.
    pub fn contains(&self, bucket: u64) -> bool {
        self.start_key <= bucket && bucket <= self.end_key
    }
}

wire_struct! {
    /// File attributes stored with each directory entry.
    pub struct StatRecord {
        pub mode: u32,
        pub uid: u32,
        pub gid: u32,
        pub nlink: u32,
        pub size: u64,
        pub atime: i64,
        pub mtime: i64,
        pub ctime: i64,
    }
}

wire_struct! {
    /// One readdir result row.
    pub struct DirEntryRecord {
        pub parent: u64,
        pub name: String,
        pub inode: u64,
    }
}

wire_struct! {
    /// One bulk-copy row shipped by send-shard-entries. Carries the full
    /// attribute snapshot so the target needs no second lookup.
    pub struct EntryRecord {
        pub parent: u64,
        pub name: String,
        pub inode: u64,
        pub stat: StatRecord,
    }
}

wire_struct! {
    /// Resumable position within a bulk copy. The scan walks routing key
    /// buckets in the child range, directories within a bucket, then entries
    /// within a directory at `offset`.
    pub struct EntryCursor {
        pub bucket: u64,
        pub parent: u64,
        pub offset: u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{WireDeserialize, WireSerialize};

    #[test]
    fn test_descriptor_contains_inclusive() {
        let d = ShardDescriptor::new(1, 100, 200);
        assert!(d.contains(100));
        assert!(d.contains(150));
        assert!(d.contains(200));
        assert!(!d.contains(99));
        assert!(!d.contains(201));
    }

    #[test]
    fn test_descriptor_wire_layout() {
        // u32 id + u64 start + u64 end, little endian, no padding.
        let d = ShardDescriptor::new(0x01020304, 0x1111, 0x2222);
        let mut buf = Vec::new();
        d.wire_serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_entry_record_roundtrip() {
        let rec = EntryRecord {
            parent: 42,
            name: "notes.txt".to_string(),
            inode: 7,
            stat: StatRecord {
                mode: 0o644,
                size: 1024,
                mtime: 1_700_000_000,
                ..Default::default()
            },
        };
        let mut buf = Vec::new();
        rec.wire_serialize(&mut buf).unwrap();
        let mut offset = 0;
        assert_eq!(EntryRecord::wire_deserialize(&buf, &mut offset).unwrap(), rec);
        assert_eq!(offset, buf.len());
    }
}
