use metafs_proto::ShardDescriptor;

/// Client-side cache of the shard directory.
///
/// Resolution is a linear scan testing range containment. At the table
/// sizes this serves (tens of shards) the scan beats a tree lookup, and it
/// keeps wholesale replacement trivial.
#[derive(Default)]
pub struct ShardRouter {
    shards: Vec<ShardDescriptor>,
}

impl ShardRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with a fresh snapshot.
    pub fn update(&mut self, shards: Vec<ShardDescriptor>) {
        self.shards = shards;
    }

    pub fn resolve(&self, bucket: u64) -> Option<&ShardDescriptor> {
        self.shards.iter().find(|d| d.contains(bucket))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_containment() {
        let mut router = ShardRouter::new();
        assert!(router.resolve(5).is_none());

        router.update(vec![
            ShardDescriptor::new(0, 0, 511),
            ShardDescriptor::new(3, 512, 1023),
        ]);
        assert_eq!(router.resolve(0).unwrap().id, 0);
        assert_eq!(router.resolve(511).unwrap().id, 0);
        assert_eq!(router.resolve(512).unwrap().id, 3);
        assert_eq!(router.resolve(1023).unwrap().id, 3);
        assert!(router.resolve(1024).is_none());
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut router = ShardRouter::new();
        router.update(vec![ShardDescriptor::new(0, 0, 1023)]);
        router.update(vec![
            ShardDescriptor::new(0, 0, 511),
            ShardDescriptor::new(7, 512, 1023),
        ]);
        assert_eq!(router.len(), 2);
        assert_eq!(router.resolve(600).unwrap().id, 7);
    }
}
