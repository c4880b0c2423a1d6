//! Index shard addressing
//!
//! Maps a bucket's index layout onto the names of its directory objects and
//! maps object keys onto their owning shard. Names are an interoperability
//! contract with every gateway that ever wrote the bucket:
//!
//! | layout                 | object name              |
//! |------------------------|--------------------------|
//! | unsharded              | `.dir.<id>`              |
//! | sharded, generation 0  | `.dir.<id>.<shard>`      |
//! | sharded, generation g  | `.dir.<id>.<g>.<shard>`  |

use crate::hash::bucket_shard_index;
use objectio_common::{Bucket, BucketHashType, Error, IndexLayoutGeneration, NormalIndexLayout, Result};
use std::collections::BTreeMap;

/// Prefix of every bucket index object
pub const DIR_OID_PREFIX: &str = ".dir.";

/// Shard index to directory object name, in shard order
pub type ShardMap = BTreeMap<u32, String>;

/// Which shards of a layout a call addresses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShardFilter {
    /// Every shard of the layout
    #[default]
    All,
    /// A single shard
    Only(u32),
}

impl From<Option<u32>> for ShardFilter {
    fn from(shard: Option<u32>) -> Self {
        shard.map_or(Self::All, Self::Only)
    }
}

/// A resolved single shard
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardTarget {
    /// Shard index; 0 for an unsharded index
    pub shard: u32,
    /// Directory object name
    pub oid: String,
}

/// Base name shared by all index objects of a bucket
pub fn bucket_oid_base(bucket: &Bucket) -> Result<String> {
    if bucket.bucket_id.is_empty() {
        return Err(Error::invalid_layout(format!(
            "empty bucket id for bucket {}",
            bucket.name
        )));
    }
    Ok(format!("{DIR_OID_PREFIX}{}", bucket.bucket_id))
}

fn sharded_name(base: &str, generation: u64, shard: u32) -> String {
    if generation == 0 {
        // generation 0 keeps the pre-resharding names
        format!("{base}.{shard}")
    } else {
        format!("{base}.{generation}.{shard}")
    }
}

/// Name of one shard object
#[must_use]
pub fn shard_object_name(base: &str, normal: &NormalIndexLayout, generation: u64, shard: u32) -> String {
    if normal.num_shards == 0 {
        base.to_string()
    } else {
        sharded_name(base, generation, shard)
    }
}

/// Directory objects of a layout generation
///
/// An unsharded layout always yields `{0: base}`. A filter outside
/// `0..num_shards` yields an empty map.
#[must_use]
pub fn build_shard_map(base: &str, layout: &IndexLayoutGeneration, filter: ShardFilter) -> ShardMap {
    let num_shards = layout.layout.normal.num_shards;
    let mut objs = ShardMap::new();
    if num_shards == 0 {
        objs.insert(0, base.to_string());
        return objs;
    }
    match filter {
        ShardFilter::All => {
            for shard in 0..num_shards {
                objs.insert(shard, sharded_name(base, layout.generation, shard));
            }
        }
        ShardFilter::Only(shard) if shard < num_shards => {
            objs.insert(shard, sharded_name(base, layout.generation, shard));
        }
        ShardFilter::Only(_) => {}
    }
    objs
}

/// Shard owning `key`, with its directory object name
pub fn locate_shard(base: &str, layout: &IndexLayoutGeneration, key: &str) -> Result<ShardTarget> {
    let normal = &layout.layout.normal;
    match normal.hash_type {
        BucketHashType::Mod => {
            if normal.num_shards == 0 {
                return Ok(ShardTarget {
                    shard: 0,
                    oid: base.to_string(),
                });
            }
            let shard = bucket_shard_index(key, normal.num_shards);
            Ok(ShardTarget {
                shard,
                oid: sharded_name(base, layout.generation, shard),
            })
        }
        BucketHashType::Unknown => Err(Error::unsupported(format!(
            "bucket hash type {:?}",
            normal.hash_type
        ))),
    }
}

/// Per-shard bucket instance ids (`name:bucket_id[:shard]`)
#[must_use]
pub fn bucket_instance_ids(bucket: &Bucket, num_shards: u32, filter: ShardFilter) -> BTreeMap<u32, String> {
    let plain_id = format!("{}:{}", bucket.name, bucket.bucket_id);
    let mut ids = BTreeMap::new();
    if num_shards == 0 {
        ids.insert(0, plain_id);
        return ids;
    }
    match filter {
        ShardFilter::All => {
            for shard in 0..num_shards {
                ids.insert(shard, format!("{plain_id}:{shard}"));
            }
        }
        ShardFilter::Only(shard) if shard < num_shards => {
            ids.insert(shard, format!("{plain_id}:{shard}"));
        }
        ShardFilter::Only(_) => {}
    }
    ids
}
