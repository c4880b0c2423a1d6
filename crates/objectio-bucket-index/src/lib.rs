//! ObjectIO Bucket Index - sharded directory operations
//!
//! This crate implements the bucket-wide index calls of the gateway:
//! - Bounded-concurrency fan-out over index shards with retry and rollback
//! - Per-operation shard behaviors (init, clean, headers, list, reshard, ...)
//! - Async and blocking entry points over the same engine
//! - Datasync flag change propagation
//!
//! # Example
//! ```ignore
//! let svc = BucketIndexService::new(transport, placement, ConfigHandle::default());
//! svc.init_index(&info, &info.layout.current_index, false, &CallOptions::default()).await?;
//! let stats = svc.read_stats(&info, &CallOptions::default()).await?;
//! ```

pub mod blocking;
pub mod exec;
pub mod ops;
pub mod service;
pub mod shard_io;
pub mod sync;

// Re-exports
pub use blocking::BlockingBucketIndex;
pub use exec::{block_on, maybe_warn_about_blocking};
pub use service::{
    BucketIndexService, BucketStats, CallOptions, IndexObjects, ListRequest, ShardHeaders,
};
pub use shard_io::{Outcome, ShardIo, ShardOp};
pub use sync::{BucketLogService, DataChangesLog};
