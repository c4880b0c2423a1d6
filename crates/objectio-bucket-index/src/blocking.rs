//! Synchronous facade over [`BucketIndexService`]
//!
//! Each call drives the async operation on a dedicated thread and blocks
//! the caller until it completes. Engine behavior is identical to the async
//! API; only the waiting differs.

use crate::exec;
use crate::service::{
    BucketIndexService, BucketStats, CallOptions, IndexObjects, ListRequest, ShardHeaders,
};
use objectio_client::{CheckIndexResult, ReshardStatus, ReshardStatusEntry, ShardListResult};
use objectio_common::{BucketInfo, IndexLayoutGeneration, Result};
use objectio_placement::ShardFilter;
use std::collections::BTreeMap;
use std::future::Future;

/// Blocking view of a service; obtained from [`BucketIndexService::blocking`]
pub struct BlockingBucketIndex<'a> {
    svc: &'a BucketIndexService,
}

impl<'a> BlockingBucketIndex<'a> {
    pub(crate) const fn new(svc: &'a BucketIndexService) -> Self {
        Self { svc }
    }

    fn wait<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let warn = self.svc.config().snapshot().config.warn_on_blocking;
        exec::block_on(warn, fut)
    }

    pub fn open_bucket_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        filter: ShardFilter,
    ) -> Result<IndexObjects> {
        self.svc.open_bucket_index(info, layout, filter)
    }

    pub fn init_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        judge_support_logrecord: bool,
        opts: &CallOptions,
    ) -> Result<()> {
        self.wait(self.svc.init_index(info, layout, judge_support_logrecord, opts))
    }

    pub fn clean_index(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        opts: &CallOptions,
    ) -> Result<()> {
        self.wait(self.svc.clean_index(info, layout, opts))
    }

    pub fn read_headers(
        &self,
        info: &BucketInfo,
        layout: &IndexLayoutGeneration,
        filter: ShardFilter,
        opts: &CallOptions,
    ) -> Result<ShardHeaders> {
        self.wait(self.svc.read_headers(info, layout, filter, opts))
    }

    pub fn read_stats(&self, info: &BucketInfo, opts: &CallOptions) -> Result<BucketStats> {
        self.wait(self.svc.read_stats(info, opts))
    }

    pub fn list_objects(
        &self,
        info: &BucketInfo,
        filter: ShardFilter,
        request: &ListRequest,
        results: &mut BTreeMap<u32, ShardListResult>,
        opts: &CallOptions,
    ) -> Result<()> {
        self.wait(self.svc.list_objects(info, filter, request, results, opts))
    }

    pub fn get_reshard_status(
        &self,
        info: &BucketInfo,
        opts: &CallOptions,
    ) -> Result<Vec<ReshardStatusEntry>> {
        self.wait(self.svc.get_reshard_status(info, opts))
    }

    pub fn set_reshard_status(
        &self,
        info: &BucketInfo,
        status: ReshardStatus,
        opts: &CallOptions,
    ) -> Result<()> {
        self.wait(self.svc.set_reshard_status(info, status, opts))
    }

    pub fn trim_reshard_log(&self, info: &BucketInfo, opts: &CallOptions) -> Result<()> {
        self.wait(self.svc.trim_reshard_log(info, opts))
    }

    pub fn set_tag_timeout(&self, info: &BucketInfo, timeout: u64, opts: &CallOptions) -> Result<()> {
        self.wait(self.svc.set_tag_timeout(info, timeout, opts))
    }

    pub fn check_index(
        &self,
        info: &BucketInfo,
        opts: &CallOptions,
    ) -> Result<BTreeMap<u32, CheckIndexResult>> {
        self.wait(self.svc.check_index(info, opts))
    }

    pub fn rebuild_index(&self, info: &BucketInfo, opts: &CallOptions) -> Result<()> {
        self.wait(self.svc.rebuild_index(info, opts))
    }

    pub fn handle_overwrite(&self, info: &BucketInfo, orig_info: &BucketInfo) -> Result<()> {
        self.wait(self.svc.handle_overwrite(info, orig_info))
    }
}
