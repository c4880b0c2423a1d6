//! Index pool resolution
//!
//! Decides which storage pool holds a bucket's index objects. A pool set
//! explicitly on the bucket wins; otherwise the bucket's placement rule (or
//! the zonegroup default when the bucket has none) is looked up in the zone's
//! placement targets.

use objectio_common::{BucketInfo, Error, IndexPool, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolves the index pool of a bucket
pub trait PlacementResolver: Send + Sync {
    /// Pool holding the bucket's index objects
    fn index_pool(&self, info: &BucketInfo) -> Result<IndexPool>;
}

/// Pools backing one placement target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPools {
    pub index_pool: String,
    pub data_pool: String,
}

/// Placement targets of a zone
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ZonePlacement {
    /// Rule used by buckets without an explicit placement rule
    pub default_placement: String,
    /// Rule name to pools
    pub placement_pools: HashMap<String, PlacementPools>,
}

impl ZonePlacement {
    /// Zone with a single default placement target
    #[must_use]
    pub fn single(rule: impl Into<String>, index_pool: impl Into<String>, data_pool: impl Into<String>) -> Self {
        let rule = rule.into();
        let mut placement_pools = HashMap::new();
        placement_pools.insert(
            rule.clone(),
            PlacementPools {
                index_pool: index_pool.into(),
                data_pool: data_pool.into(),
            },
        );
        Self {
            default_placement: rule,
            placement_pools,
        }
    }

    /// Add or replace a placement target
    pub fn add_target(&mut self, rule: impl Into<String>, pools: PlacementPools) {
        self.placement_pools.insert(rule.into(), pools);
    }
}

impl PlacementResolver for ZonePlacement {
    fn index_pool(&self, info: &BucketInfo) -> Result<IndexPool> {
        if let Some(explicit) = info.bucket.explicit_index_pool.as_deref().filter(|p| !p.is_empty()) {
            return Ok(IndexPool::new(explicit));
        }

        let rule = if info.placement_rule.is_empty() {
            &self.default_placement
        } else {
            &info.placement_rule
        };
        self.placement_pools
            .get(rule)
            .map(|pools| IndexPool::new(pools.index_pool.clone()))
            .ok_or_else(|| {
                Error::invalid_placement(format!(
                    "could not find placement rule '{rule}' for bucket {}",
                    info.bucket
                ))
            })
    }
}
