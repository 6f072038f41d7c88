/// 64-bit finalizer from MurmurHash3 (x64 variant). Full avalanche, so
/// consecutive inode ids spread evenly across routing buckets.
#[inline(always)]
pub fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

/// Map a parent directory inode id onto a routing key bucket in
/// `[0, key_space)`. Every server must compute the same bucket for the
/// same inode, so this is a pure function of its arguments.
#[inline]
pub fn routing_bucket(parent_id: u64, key_space: u64) -> u64 {
    debug_assert!(key_space > 0);
    fmix64(parent_id) % key_space
}
