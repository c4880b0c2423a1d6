//! ObjectIO Placement - bucket index addressing
//!
//! This crate maps a bucket's index layout onto its directory objects and
//! resolves the pool those objects live in.
//!
//! # Example
//! ```ignore
//! use objectio_placement::{build_shard_map, bucket_oid_base, ShardFilter};
//!
//! let base = bucket_oid_base(&info.bucket)?;
//! let objs = build_shard_map(&base, &info.layout.current_index, ShardFilter::All);
//! ```

pub mod hash;
pub mod policy;
pub mod shard;

pub use hash::bucket_shard_index;
pub use policy::{PlacementPools, PlacementResolver, ZonePlacement};
pub use shard::{
    DIR_OID_PREFIX, ShardFilter, ShardMap, ShardTarget, bucket_instance_ids, bucket_oid_base,
    build_shard_map, locate_shard, shard_object_name,
};
