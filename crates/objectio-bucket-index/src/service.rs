//! Bucket index service
//!
//! Every bucket-wide call resolves the bucket's index pool and shard objects
//! first, then fans one per-shard behavior out through the engine. Failures
//! to resolve placement or naming abort before any remote call.

use crate::blocking::BlockingBucketIndex;
use crate::ops::{
    CheckReader, IndexCleanWriter, IndexHeadReader, IndexInitWriter, ListReader, RebuildWriter,
    ReshardStatusReader, ReshardStatusWriter, ReshardTrimWriter, TagTimeoutWriter,
};
use crate::shard_io::ShardIo;
use crate::sync::{BucketLogService, DataChangesLog, SyncServices};
use objectio_client::{
    CheckIndexResult, DirHeader, IndexTransport, ObjCategory, ObjKey, ReshardStatus,
    ReshardStatusEntry, ShardListResult, wire,
};
use objectio_common::{
    BucketIndexType, BucketInfo, ConfigHandle, IndexConfig, IndexLayoutGeneration, IndexPool,
    Result,
};
use objectio_placement::{
    PlacementResolver, ShardFilter, ShardMap, ShardTarget, bucket_instance_ids, bucket_oid_base,
    build_shard_map, locate_shard, shard_object_name,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-call options
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Overrides the configured concurrency window
    pub max_aio: Option<usize>,
    /// Cancels the call; in-flight shard operations drain first
    pub cancel: CancellationToken,
}

impl CallOptions {
    #[must_use]
    pub fn with_max_aio(mut self, max_aio: usize) -> Self {
        self.max_aio = Some(max_aio);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Resolved index objects of one layout generation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexObjects {
    pub pool: IndexPool,
    pub objs: ShardMap,
}

/// Shard headers of one layout generation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardHeaders {
    pub headers: BTreeMap<u32, DirHeader>,
    /// `name:bucket_id[:shard]` for each addressed shard
    pub instance_ids: BTreeMap<u32, String>,
}

/// Bucket usage summed over the main category of every shard
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketStats {
    pub bucket: String,
    pub placement_rule: String,
    pub count: u64,
    pub size: u64,
    pub size_rounded: u64,
}

/// Listing parameters shared by all shards of one call
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    /// Start after this key
    pub start: ObjKey,
    pub prefix: String,
    pub delimiter: String,
    /// Per-shard entry budget; configured default when unset
    pub max_entries: Option<u32>,
    pub list_versions: bool,
}

/// Sharded bucket index operations
pub struct BucketIndexService {
    transport: Arc<dyn IndexTransport>,
    placement: Arc<dyn PlacementResolver>,
    config: ConfigHandle,
    sync: Option<SyncServices>,
}

impl BucketIndexService {
    pub fn new(
        transport: Arc<dyn IndexTransport>,
        placement: Arc<dyn PlacementResolver>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            transport,
            placement,
            config,
            sync: None,
        }
    }

    /// Service that also propagates sync-flag changes
    pub fn with_sync_services(
        transport: Arc<dyn IndexTransport>,
        placement: Arc<dyn PlacementResolver>,
        config: ConfigHandle,
        bilog: Arc<dyn BucketLogService>,
        datalog: Arc<dyn DataChangesLog>,
    ) -> Self {
        Self {
            transport,
            placement,
            config,
            sync: Some(SyncServices { bilog, datalog }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub(crate) const fn sync_services(&self) -> Option<&SyncServices> {
        self.sync.as_ref()
    }

    /// Synchronous facade for callers that cannot await
    #[must_use]
    pub const fn blocking(&self) -> BlockingBucketIndex<'_> {
        BlockingBucketIndex::new(self)
    }

    fn engine<'a>(
        &'a self,
        pool: &'a IndexPool,
        config: &IndexConfig,
        opts: &'a CallOptions,
    ) -> ShardIo<'a> {
        let max_aio = opts.max_aio.unwrap_or(config.max_aio);
        ShardIo::new(self.transport.as_ref(), pool, max_aio, &opts.cancel)
    }

    /// Pool and shard objects of `layout`
    pub fn open_bucket_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        filter: ShardFilter,
    ) -> Result<IndexObjects> {
        let base = bucket_oid_base(&info.bucket)?;
        let pool = self.placement.index_pool(info)?;
        Ok(IndexObjects {
            pool,
            objs: build_shard_map(&base, layout, filter),
        })
    }

    /// Shard owning `key` in the current index generation
    pub fn open_bucket_index_shard(
        &self,
        info: &BucketInfo,
        key: &str,
    ) -> Result<(IndexPool, ShardTarget)> {
        let base = bucket_oid_base(&info.bucket)?;
        let pool = self.placement.index_pool(info)?;
        let target = locate_shard(&base, &info.layout.current_index, key)?;
        Ok((pool, target))
    }

    /// Shard `shard` of `layout`
    pub fn open_bucket_index_shard_by_id(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        shard: u32,
    ) -> Result<(IndexPool, ShardTarget)> {
        let base = bucket_oid_base(&info.bucket)?;
        let pool = self.placement.index_pool(info)?;
        let oid = shard_object_name(&base, &layout.layout.normal, layout.generation, shard);
        Ok((pool, ShardTarget { shard, oid }))
    }

    /// Create all shard objects of `layout`
    ///
    /// All or nothing: if any shard fails, the shards created by this call
    /// are removed again. Non-normal index kinds have no objects and succeed.
    pub async fn init_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        judge_support_logrecord: bool,
        opts: &CallOptions,
    ) -> Result<()> {
        if layout.layout.kind != BucketIndexType::Normal {
            debug!(bucket = %info.bucket, "no index objects to create");
            return Ok(());
        }
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } = self.open_bucket_index(info, layout, ShardFilter::All)?;

        let writer = IndexInitWriter {
            judge_support_logrecord,
        };
        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &writer, &mut slots)
            .await?;
        info!(bucket = %info.bucket, generation = layout.generation, shards = objs.len(), "initialized bucket index");
        Ok(())
    }

    /// Remove all shard objects of `layout`
    pub async fn clean_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        opts: &CallOptions,
    ) -> Result<()> {
        if layout.layout.kind != BucketIndexType::Normal {
            debug!(bucket = %info.bucket, "no index objects to remove");
            return Ok(());
        }
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } = self.open_bucket_index(info, layout, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &IndexCleanWriter, &mut slots)
            .await?;
        info!(bucket = %info.bucket, generation = layout.generation, shards = objs.len(), "removed bucket index");
        Ok(())
    }

    /// Read the headers of the addressed shards
    ///
    /// A shard that was never written reads as an empty header.
    pub async fn read_headers(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        filter: ShardFilter,
        opts: &CallOptions,
    ) -> Result<ShardHeaders> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } = self.open_bucket_index(info, layout, filter)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &IndexHeadReader, &mut slots)
            .await?;

        let mut headers = BTreeMap::new();
        for (shard, payload) in slots {
            let header: DirHeader = wire::decode_or_default("dir header", &payload)?;
            headers.insert(shard, header);
        }
        Ok(ShardHeaders {
            headers,
            instance_ids: bucket_instance_ids(&info.bucket, layout.layout.normal.num_shards, filter),
        })
    }

    /// Usage of the current index generation
    pub async fn read_stats(&self, info: &BucketInfo, opts: &CallOptions) -> Result<BucketStats> {
        let ShardHeaders { headers, .. } = self
            .read_headers(info, &info.layout.current_index, ShardFilter::All, opts)
            .await?;

        let mut stats = BucketStats {
            bucket: info.bucket.to_string(),
            placement_rule: info.placement_rule.clone(),
            ..BucketStats::default()
        };
        for main in headers.values().filter_map(|h| h.stats.get(&ObjCategory::Main)) {
            stats.count += main.num_entries;
            stats.size += main.total_size;
            stats.size_rounded += main.total_size_rounded;
        }
        Ok(stats)
    }

    /// List the addressed shards of the current index generation
    ///
    /// `results` receives each shard's page, including pages gathered before
    /// an error aborted the call. Passing back the map from a previous call
    /// resumes every shard after its last returned marker.
    pub async fn list_objects(
        &self,
        info: &BucketInfo,
        filter: ShardFilter,
        request: &ListRequest,
        results: &mut BTreeMap<u32, ShardListResult>,
        opts: &CallOptions,
    ) -> Result<()> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, filter)?;

        let reader = ListReader {
            start: &request.start,
            prefix: &request.prefix,
            delimiter: &request.delimiter,
            max_entries: request.max_entries.unwrap_or(config.config.list_max_entries),
            list_versions: request.list_versions,
        };
        self.engine(&pool, &config.config, opts)
            .run(&objs, &reader, results)
            .await
    }

    /// Resharding status of every shard, in shard order
    pub async fn get_reshard_status(
        &self,
        info: &BucketInfo,
        opts: &CallOptions,
    ) -> Result<Vec<ReshardStatusEntry>> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &ReshardStatusReader, &mut slots)
            .await?;
        slots
            .values()
            .map(|payload| wire::decode_or_default::<ReshardStatusEntry>("reshard status", payload))
            .collect()
    }

    /// Write `status` to every shard of the current index generation
    pub async fn set_reshard_status(
        &self,
        info: &BucketInfo,
        status: ReshardStatus,
        opts: &CallOptions,
    ) -> Result<()> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &ReshardStatusWriter { status }, &mut slots)
            .await
    }

    /// Drain the reshard log of every shard
    pub async fn trim_reshard_log(&self, info: &BucketInfo, opts: &CallOptions) -> Result<()> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &ReshardTrimWriter, &mut slots)
            .await?;
        debug!(
            bucket = %info.bucket,
            batches = slots.values().sum::<u32>(),
            "trimmed reshard log"
        );
        Ok(())
    }

    /// Set the pending-operation tag timeout on every shard
    pub async fn set_tag_timeout(
        &self,
        info: &BucketInfo,
        timeout: u64,
        opts: &CallOptions,
    ) -> Result<()> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &TagTimeoutWriter { timeout }, &mut slots)
            .await
    }

    /// Stored and recomputed header of every shard
    pub async fn check_index(
        &self,
        info: &BucketInfo,
        opts: &CallOptions,
    ) -> Result<BTreeMap<u32, CheckIndexResult>> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &CheckReader, &mut slots)
            .await?;
        let mut checked = BTreeMap::new();
        for (shard, payload) in slots {
            let result: CheckIndexResult = wire::decode("check result", &payload)?;
            checked.insert(shard, result);
        }
        Ok(checked)
    }

    /// Replace every shard header with one recomputed from its entries
    pub async fn rebuild_index(&self, info: &BucketInfo, opts: &CallOptions) -> Result<()> {
        let config = self.config.snapshot();
        let IndexObjects { pool, objs } =
            self.open_bucket_index(info, &info.layout.current_index, ShardFilter::All)?;

        let mut slots = BTreeMap::new();
        self.engine(&pool, &config.config, opts)
            .run(&objs, &RebuildWriter, &mut slots)
            .await?;
        info!(bucket = %info.bucket, shards = objs.len(), "rebuilt bucket index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_client::{DirEntry, IndexOp, MemoryTransport, OpError, OpKind};
    use objectio_common::{Bucket, Error};
    use objectio_placement::ZonePlacement;
    use std::time::Duration;

    const INDEX_POOL: &str = "default.rgw.buckets.index";

    fn pool() -> IndexPool {
        IndexPool::new(INDEX_POOL)
    }

    fn service(transport: &Arc<MemoryTransport>) -> BucketIndexService {
        service_with(transport, IndexConfig::default())
    }

    fn service_with(transport: &Arc<MemoryTransport>, config: IndexConfig) -> BucketIndexService {
        let placement = ZonePlacement::single("default-placement", INDEX_POOL, "default.rgw.buckets.data");
        BucketIndexService::new(
            transport.clone(),
            Arc::new(placement),
            ConfigHandle::new(config),
        )
    }

    fn bucket_info(num_shards: u32) -> BucketInfo {
        BucketInfo::new(
            Bucket::with_id("photos", "b1"),
            IndexLayoutGeneration::normal(0, num_shards),
        )
    }

    fn opts() -> CallOptions {
        CallOptions::default()
    }

    async fn init(svc: &BucketIndexService, info: &BucketInfo) -> Result<()> {
        svc.init_index(info, &info.layout.current_index, false, &opts())
            .await
    }

    #[tokio::test]
    async fn test_init_creates_every_shard() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(4);

        init(&svc, &info).await.unwrap();
        assert_eq!(
            transport.object_names(&pool()),
            vec![".dir.b1.0", ".dir.b1.1", ".dir.b1.2", ".dir.b1.3"]
        );
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(4);

        init(&svc, &info).await.unwrap();
        init(&svc, &info).await.unwrap();
        assert_eq!(transport.object_names(&pool()).len(), 4);
    }

    #[tokio::test]
    async fn test_init_failure_rolls_back() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(4);
        transport.fail_always(".dir.b1.2", OpKind::Init, OpError::Io("osd down".into()));

        let err = init(&svc, &info).await.unwrap_err();
        assert!(matches!(err, Error::Remote(ref msg) if msg.contains("osd down")));
        assert!(transport.object_names(&pool()).is_empty());

        transport.clear_faults();
        init(&svc, &info).await.unwrap();
        assert_eq!(transport.object_names(&pool()).len(), 4);
    }

    #[tokio::test]
    async fn test_init_reshard_log_probe() {
        let transport = Arc::new(MemoryTransport::new().without_reshard_log());
        let svc = service(&transport);
        let info = bucket_info(3);

        let err = svc
            .init_index(&info, &info.layout.current_index, true, &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(transport.object_names(&pool()).is_empty());
    }

    #[tokio::test]
    async fn test_indexless_bucket_is_noop() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let mut info = bucket_info(4);
        info.layout.current_index.layout.kind = BucketIndexType::Indexless;

        init(&svc, &info).await.unwrap();
        svc.clean_index(&info, &info.layout.current_index, &opts())
            .await
            .unwrap();
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_bucket_makes_no_calls() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);

        let mut no_id = bucket_info(2);
        no_id.bucket.bucket_id.clear();
        assert!(matches!(init(&svc, &no_id).await, Err(Error::InvalidLayout(_))));

        let mut bad_rule = bucket_info(2);
        bad_rule.placement_rule = "cold".into();
        assert!(matches!(
            init(&svc, &bad_rule).await,
            Err(Error::InvalidPlacement(_))
        ));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_clean_tolerates_missing_shards() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(3);
        init(&svc, &info).await.unwrap();
        transport
            .execute(&pool(), ".dir.b1.1", IndexOp::Remove)
            .await
            .unwrap();

        svc.clean_index(&info, &info.layout.current_index, &opts())
            .await
            .unwrap();
        assert!(transport.object_names(&pool()).is_empty());
    }

    #[tokio::test]
    async fn test_stats_skip_missing_header() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(3);
        init(&svc, &info).await.unwrap();
        transport
            .put_entry(&pool(), ".dir.b1.0", DirEntry::object("a", 10))
            .unwrap();
        transport
            .put_entry(&pool(), ".dir.b1.1", DirEntry::object("b", 5))
            .unwrap();
        transport
            .put_entry(&pool(), ".dir.b1.1", DirEntry::object("c", 15))
            .unwrap();
        transport
            .execute(&pool(), ".dir.b1.2", IndexOp::Remove)
            .await
            .unwrap();

        let stats = svc.read_stats(&info, &opts()).await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.size, 30);
        assert_eq!(stats.bucket, "photos[b1]");
    }

    #[tokio::test]
    async fn test_read_headers_single_shard() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(4);
        init(&svc, &info).await.unwrap();

        let read = svc
            .read_headers(&info, &info.layout.current_index, ShardFilter::Only(2), &opts())
            .await
            .unwrap();
        assert_eq!(read.headers.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(read.instance_ids[&2], "photos:b1:2");
        assert_eq!(transport.calls(".dir.b1.2", OpKind::ReadHeader), 1);
        assert_eq!(transport.calls(".dir.b1.0", OpKind::ReadHeader), 0);

        let none = svc
            .read_headers(&info, &info.layout.current_index, ShardFilter::Only(9), &opts())
            .await
            .unwrap();
        assert!(none.headers.is_empty());
    }

    #[tokio::test]
    async fn test_list_retries_until_progress() {
        let transport = Arc::new(MemoryTransport::new().with_list_scan_budget(2));
        let svc = service(&transport);
        let info = bucket_info(0);
        init(&svc, &info).await.unwrap();
        for name in ["d1", "d2", "d3", "d4", "d5"] {
            let mut marker = DirEntry::object(name, 0);
            marker.exists = false;
            transport.put_entry(&pool(), ".dir.b1", marker).unwrap();
        }
        transport
            .put_entry(&pool(), ".dir.b1", DirEntry::object("z", 1))
            .unwrap();

        let mut results = BTreeMap::new();
        svc.list_objects(&info, ShardFilter::All, &ListRequest::default(), &mut results, &opts())
            .await
            .unwrap();

        let page = &results[&0];
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key.name, "z");
        assert!(!page.is_truncated);
        assert_eq!(transport.calls(".dir.b1", OpKind::List), 3);
    }

    #[tokio::test]
    async fn test_list_resumes_from_previous_page() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(0);
        init(&svc, &info).await.unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            transport
                .put_entry(&pool(), ".dir.b1", DirEntry::object(name, 1))
                .unwrap();
        }

        let request = ListRequest {
            max_entries: Some(2),
            ..ListRequest::default()
        };
        let mut results = BTreeMap::new();
        let mut names = Vec::new();
        loop {
            svc.list_objects(&info, ShardFilter::All, &request, &mut results, &opts())
                .await
                .unwrap();
            let page = &results[&0];
            names.extend(page.entries.iter().map(|e| e.key.name.clone()));
            if !page.is_truncated {
                break;
            }
        }
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(transport.calls(".dir.b1", OpKind::List), 3);
    }

    #[tokio::test]
    async fn test_list_stall_is_reported() {
        let transport = Arc::new(MemoryTransport::new().with_list_scan_budget(0));
        let svc = service(&transport);
        let info = bucket_info(0);
        init(&svc, &info).await.unwrap();
        transport
            .put_entry(&pool(), ".dir.b1", DirEntry::object("a", 1))
            .unwrap();

        let mut results = BTreeMap::new();
        let err = svc
            .list_objects(&info, ShardFilter::All, &ListRequest::default(), &mut results, &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(transport.calls(".dir.b1", OpKind::List), 1);
    }

    #[tokio::test]
    async fn test_list_keeps_partial_results() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(2);
        init(&svc, &info).await.unwrap();
        transport
            .put_entry(&pool(), ".dir.b1.0", DirEntry::object("a", 1))
            .unwrap();
        transport.fail_always(".dir.b1.1", OpKind::List, OpError::Timeout);

        let mut results = BTreeMap::new();
        let err = svc
            .list_objects(&info, ShardFilter::All, &ListRequest::default(), &mut results, &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(results[&0].entries.len(), 1);
    }

    #[tokio::test]
    async fn test_list_with_prefix_and_delimiter() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(0);
        init(&svc, &info).await.unwrap();
        for name in ["img/a.jpg", "img/raw/b.cr2", "img/raw/c.cr2", "txt/readme"] {
            transport
                .put_entry(&pool(), ".dir.b1", DirEntry::object(name, 1))
                .unwrap();
        }

        let request = ListRequest {
            prefix: "img/".into(),
            delimiter: "/".into(),
            ..ListRequest::default()
        };
        let mut results = BTreeMap::new();
        svc.list_objects(&info, ShardFilter::All, &request, &mut results, &opts())
            .await
            .unwrap();

        let page = &results[&0];
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key.name, "img/a.jpg");
        assert_eq!(page.common_prefixes, vec!["img/raw/".to_string()]);
    }

    #[tokio::test]
    async fn test_reshard_status_round_trip() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(3);
        init(&svc, &info).await.unwrap();

        svc.set_reshard_status(&info, ReshardStatus::InProgress, &opts())
            .await
            .unwrap();
        transport
            .execute(&pool(), ".dir.b1.1", IndexOp::Remove)
            .await
            .unwrap();

        let status = svc.get_reshard_status(&info, &opts()).await.unwrap();
        let status: Vec<_> = status.iter().map(|e| e.reshard_status).collect();
        assert_eq!(
            status,
            vec![
                ReshardStatus::InProgress,
                ReshardStatus::NotResharding,
                ReshardStatus::InProgress
            ]
        );
    }

    #[tokio::test]
    async fn test_trim_drains_reshard_log() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(2);
        init(&svc, &info).await.unwrap();
        transport
            .append_reshard_log(&pool(), ".dir.b1.0", 2500)
            .unwrap();

        svc.trim_reshard_log(&info, &opts()).await.unwrap();
        assert_eq!(transport.reshard_log_len(&pool(), ".dir.b1.0"), Some(0));
        // Three batches, then the no-data answer
        assert_eq!(transport.calls(".dir.b1.0", OpKind::TrimReshardLog), 4);
        assert_eq!(transport.calls(".dir.b1.1", OpKind::TrimReshardLog), 1);
    }

    #[tokio::test]
    async fn test_tag_timeout_and_rebuild() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(2);
        init(&svc, &info).await.unwrap();

        svc.set_tag_timeout(&info, 30, &opts()).await.unwrap();
        assert_eq!(
            transport.header(&pool(), ".dir.b1.1").map(|h| h.tag_timeout),
            Some(30)
        );

        transport
            .put_entry(&pool(), ".dir.b1.0", DirEntry::object("a", 100))
            .unwrap();
        transport
            .set_header(&pool(), ".dir.b1.0", DirHeader::default())
            .unwrap();
        let checked = svc.check_index(&info, &opts()).await.unwrap();
        assert_ne!(checked[&0].existing_header, checked[&0].calculated_header);

        svc.rebuild_index(&info, &opts()).await.unwrap();
        let checked = svc.check_index(&info, &opts()).await.unwrap();
        for result in checked.values() {
            assert_eq!(result.existing_header, result.calculated_header);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_from_config_and_override() {
        let transport = Arc::new(
            MemoryTransport::new().with_latency(Duration::from_millis(5), Duration::from_millis(5)),
        );
        let config = IndexConfig {
            max_aio: 2,
            ..IndexConfig::default()
        };
        let svc = service_with(&transport, config);
        let info = bucket_info(5);

        init(&svc, &info).await.unwrap();
        assert!(transport.peak_in_flight() <= 2);

        let narrow = MemoryTransport::new().with_latency(Duration::from_millis(5), Duration::ZERO);
        let narrow = Arc::new(narrow);
        let svc = service(&narrow);
        svc.init_index(
            &info,
            &info.layout.current_index,
            false,
            &CallOptions::default().with_max_aio(1),
        )
        .await
        .unwrap();
        assert_eq!(narrow.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let info = bucket_info(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = svc
            .init_index(
                &info,
                &info.layout.current_index,
                false,
                &CallOptions::default().with_cancel(cancel),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.total_calls(), 0);
    }

    #[test]
    fn test_shard_lookup() {
        let transport = Arc::new(MemoryTransport::new());
        let svc = service(&transport);
        let mut info = bucket_info(8);
        info.layout.current_index.generation = 3;

        let (pool, target) = svc.open_bucket_index_shard(&info, "cat.jpg").unwrap();
        assert_eq!(pool.as_str(), INDEX_POOL);
        assert_eq!(target.oid, format!(".dir.b1.3.{}", target.shard));
        assert!(target.shard < 8);

        let (_, by_id) = svc
            .open_bucket_index_shard_by_id(&info, &info.layout.current_index, target.shard)
            .unwrap();
        assert_eq!(by_id, target);

        let unsharded = bucket_info(0);
        let (_, target) = svc.open_bucket_index_shard(&unsharded, "cat.jpg").unwrap();
        assert_eq!(target.oid, ".dir.b1");
    }
}
