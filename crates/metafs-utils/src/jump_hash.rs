/// Jump consistent hash (Lamping & Veach). Maps a 64-bit key onto one of
/// `num_buckets` buckets with minimal remapping when buckets are added.
pub fn jump_consistent_hash(mut key: u64, num_buckets: u32) -> u32 {
    debug_assert!(num_buckets > 0);
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < num_buckets as i64 {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b.wrapping_add(1) as f64) * ((1i64 << 31) as f64 / ((key >> 33).wrapping_add(1) as f64)))
            as i64;
    }
    b as u32
}

/// Placement rule for shards across server sessions.
///
/// Bootstrap shards (ids below `num_sessions * shards_per_server`) stay
/// pinned so that server `s` starts with ids `s * shards_per_server ..`.
/// Shards created by splits are placed by jump hash.
pub fn server_slot_for_shard(shard_id: u32, num_sessions: u32, shards_per_server: u32) -> u32 {
    if shard_id < num_sessions * shards_per_server {
        shard_id / shards_per_server
    } else {
        jump_consistent_hash(shard_id as u64, num_sessions)
    }
}
