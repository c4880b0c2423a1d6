//! Key to shard hashing for the `Mod` hash type
//!
//! These values are persisted implicitly: every existing sharded bucket has
//! its entries placed by this function, so it must never change.

/// Modulus used when the shard count fits under it
const SHARDS_PRIME_0: u32 = 7877;
/// Modulus used for very large shard counts
const SHARDS_PRIME_1: u32 = 65521;

/// Linux dcache string hash over the raw key bytes
#[must_use]
pub fn str_hash_linux(key: &[u8]) -> u32 {
    let mut hash: u64 = 0;
    for &c in key {
        let c = u64::from(c);
        hash = hash.wrapping_add((c << 4) + (c >> 4)).wrapping_mul(11);
    }
    // Truncation is part of the placement contract
    #[allow(clippy::cast_possible_truncation)]
    let hash = hash as u32;
    hash
}

/// Reduce a hash onto `max_shards` buckets through a prime modulus
#[must_use]
pub const fn shards_mod(hash: u32, max_shards: u32) -> u32 {
    if max_shards <= SHARDS_PRIME_0 {
        hash % SHARDS_PRIME_0 % max_shards
    } else {
        hash % SHARDS_PRIME_1 % max_shards
    }
}

/// Shard index owning `key` in an index of `num_shards` shards
///
/// `num_shards` must be non-zero; unsharded indexes have no shard index.
#[must_use]
pub fn bucket_shard_index(key: &str, num_shards: u32) -> u32 {
    let sid = str_hash_linux(key.as_bytes());
    let sid2 = sid ^ ((sid & 0xff) << 24);
    shards_mod(sid2, num_shards)
}
