//! Sync-flag change propagation
//!
//! Turning datasync on or off for a bucket starts or stops its index log and
//! then records one data-changes entry per log shard so peers resync.

use crate::service::BucketIndexService;
use async_trait::async_trait;
use objectio_common::{BucketInfo, BucketLogType, Error, LogLayoutGeneration, Result};
use objectio_placement::ShardFilter;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bucket index log control
#[async_trait]
pub trait BucketLogService: Send + Sync {
    async fn log_start(
        &self,
        info: &BucketInfo,
        log: &LogLayoutGeneration,
        shards: ShardFilter,
    ) -> Result<()>;

    async fn log_stop(
        &self,
        info: &BucketInfo,
        log: &LogLayoutGeneration,
        shards: ShardFilter,
    ) -> Result<()>;
}

/// Feed of changed bucket shards consumed by sync peers
#[async_trait]
pub trait DataChangesLog: Send + Sync {
    async fn add_entry(&self, info: &BucketInfo, log: &LogLayoutGeneration, shard: u32)
    -> Result<()>;
}

pub(crate) struct SyncServices {
    pub bilog: Arc<dyn BucketLogService>,
    pub datalog: Arc<dyn DataChangesLog>,
}

impl BucketIndexService {
    /// Propagate a datasync flag change from `orig_info` to `info`
    ///
    /// Failing to start or stop the log aborts. A failed data-changes entry
    /// is logged and the remaining shards are still notified; the result of
    /// the last notification is returned.
    pub async fn handle_overwrite(&self, info: &BucketInfo, orig_info: &BucketInfo) -> Result<()> {
        let new_sync_enabled = info.datasync_flag_enabled();
        let old_sync_enabled = orig_info.datasync_flag_enabled();
        if old_sync_enabled == new_sync_enabled {
            return Ok(());
        }
        let Some(bilog) = info.layout.logs.last() else {
            debug!(bucket = %info.bucket, "no log layout, nothing to propagate");
            return Ok(());
        };
        if bilog.layout.kind != BucketLogType::InIndex {
            return Err(Error::unsupported(format!(
                "log layout type {:?} for bucket {}",
                bilog.layout.kind, info.bucket
            )));
        }
        let sync = self.sync_services().ok_or_else(|| {
            Error::Configuration("sync services are not configured".into())
        })?;

        let toggled = if new_sync_enabled {
            sync.bilog.log_start(info, bilog, ShardFilter::All).await
        } else {
            sync.bilog.log_stop(info, bilog, ShardFilter::All).await
        };
        if let Err(e) = toggled {
            error!(
                bucket = %info.bucket,
                enabled = new_sync_enabled,
                error = %e,
                "failed writing bilog"
            );
            return Err(e);
        }

        let shards_num = bilog.num_shards();
        let mut ret = Ok(());
        for shard in 0..shards_num {
            ret = sync.datalog.add_entry(info, bilog, shard).await;
            if let Err(e) = &ret {
                error!(bucket = %info.bucket, shard, error = %e, "failed writing data log");
            }
        }
        info!(
            bucket = %info.bucket,
            enabled = new_sync_enabled,
            shards = shards_num,
            "propagated datasync flag change"
        );
        ret
    }
}
