//! Core type definitions for the bucket index
//!
//! This module defines the bucket identity and the index/log layout
//! descriptions that the sharded index layer reads. These records are owned
//! by the bucket metadata; the index layer never mutates them.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a bucket as seen by the index layer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// Tenant the bucket belongs to (empty for the default tenant)
    #[serde(default)]
    pub tenant: String,
    /// User-visible bucket name
    pub name: String,
    /// Stable bucket instance id; index shard objects are named after it
    pub bucket_id: String,
    /// Pool override set when the bucket was created with explicit placement
    #[serde(default)]
    pub explicit_index_pool: Option<String>,
}

impl Bucket {
    /// Create a bucket identity with a freshly generated instance id
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tenant: String::new(),
            name: name.into(),
            bucket_id: generate_bucket_id(),
            explicit_index_pool: None,
        }
    }

    /// Create a bucket identity from an existing instance id
    #[must_use]
    pub fn with_id(name: impl Into<String>, bucket_id: impl Into<String>) -> Self {
        Self {
            tenant: String::new(),
            name: name.into(),
            bucket_id: bucket_id.into(),
            explicit_index_pool: None,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tenant.is_empty() {
            write!(f, "{}[{}]", self.name, self.bucket_id)
        } else {
            write!(f, "{}/{}[{}]", self.tenant, self.name, self.bucket_id)
        }
    }
}

/// Generate a new bucket instance id
#[must_use]
pub fn generate_bucket_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Hash scheme used to map object keys onto index shards
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketHashType {
    /// Directory string hash reduced modulo the shard count
    #[default]
    Mod,
    /// A scheme this build does not understand (decoded from newer metadata)
    #[serde(other)]
    Unknown,
}

/// Kind of index a bucket layout generation carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketIndexType {
    /// Regular sharded directory objects
    #[default]
    Normal,
    /// No index objects at all; directory operations are no-ops
    Indexless,
}

/// Sharding parameters of a normal index
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalIndexLayout {
    /// Number of shards; 0 means a single unsharded directory object
    pub num_shards: u32,
    /// Key to shard mapping
    pub hash_type: BucketHashType,
}

impl NormalIndexLayout {
    /// Sharded layout using the modulo hash
    #[must_use]
    pub const fn sharded(num_shards: u32) -> Self {
        Self {
            num_shards,
            hash_type: BucketHashType::Mod,
        }
    }

    /// Number of addressable shards (an unsharded index still has one)
    #[must_use]
    pub const fn shard_count(&self) -> u32 {
        if self.num_shards == 0 {
            1
        } else {
            self.num_shards
        }
    }
}

/// Index layout description
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndexLayout {
    #[serde(rename = "type")]
    pub kind: BucketIndexType,
    pub normal: NormalIndexLayout,
}

/// One generation of a bucket's index layout
///
/// Generation 0 is the pre-resharding layout and keeps the legacy object
/// names without a generation component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayoutGeneration {
    pub generation: u64,
    pub layout: BucketIndexLayout,
}

impl IndexLayoutGeneration {
    /// Normal layout with the given shard count and generation
    #[must_use]
    pub const fn normal(generation: u64, num_shards: u32) -> Self {
        Self {
            generation,
            layout: BucketIndexLayout {
                kind: BucketIndexType::Normal,
                normal: NormalIndexLayout::sharded(num_shards),
            },
        }
    }
}

/// Kind of bucket index log
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketLogType {
    /// Log entries are stored in the index shards themselves
    #[default]
    InIndex,
    /// A log kind this build does not understand
    #[serde(other)]
    Unknown,
}

/// Log layout description
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketLogLayout {
    #[serde(rename = "type")]
    pub kind: BucketLogType,
    /// Index generation whose shards carry the log
    pub in_index: IndexLayoutGeneration,
}

/// One generation of a bucket's log layout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLayoutGeneration {
    pub generation: u64,
    pub layout: BucketLogLayout,
}

impl LogLayoutGeneration {
    /// Number of log shards (an unsharded index still has one)
    #[must_use]
    pub const fn num_shards(&self) -> u32 {
        self.layout.in_index.layout.normal.shard_count()
    }
}

/// Current index plus the history of log layouts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketLayout {
    pub current_index: IndexLayoutGeneration,
    /// Oldest first; the last entry is the active log
    #[serde(default)]
    pub logs: Vec<LogLayoutGeneration>,
}

impl BucketLayout {
    /// Layout whose log lives in the current index generation
    #[must_use]
    pub fn with_in_index_log(current_index: IndexLayoutGeneration) -> Self {
        Self {
            current_index,
            logs: vec![LogLayoutGeneration {
                generation: current_index.generation,
                layout: BucketLogLayout {
                    kind: BucketLogType::InIndex,
                    in_index: current_index,
                },
            }],
        }
    }
}

/// Name of a storage pool holding index objects
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct IndexPool(String);

impl IndexPool {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Bucket metadata record consumed by the index layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub bucket: Bucket,
    /// Placement rule name; empty selects the zonegroup default
    #[serde(default)]
    pub placement_rule: String,
    pub layout: BucketLayout,
    /// Whether multisite data sync is enabled for this bucket
    #[serde(default = "default_true")]
    pub datasync_enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl BucketInfo {
    /// Bucket with the given index layout and an in-index log
    #[must_use]
    pub fn new(bucket: Bucket, current_index: IndexLayoutGeneration) -> Self {
        Self {
            bucket,
            placement_rule: String::new(),
            layout: BucketLayout::with_in_index_log(current_index),
            datasync_enabled: true,
        }
    }

    /// Whether datasync is enabled
    #[must_use]
    pub const fn datasync_flag_enabled(&self) -> bool {
        self.datasync_enabled
    }
}
