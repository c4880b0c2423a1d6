//! In-memory directory objects
//!
//! Implements the OSD side of every [`IndexOp`] over a process-local map.
//! Used by tests and the index bench; supports simulated latency, injected
//! failures and in-flight accounting.

use crate::op::{IndexOp, ListOp, OpError, OpKind, OpResult};
use crate::transport::IndexTransport;
use crate::wire::{
    self, CategoryStats, CheckIndexResult, DirEntry, DirHeader, ObjKey, ReshardStatus,
    ReshardStatusEntry, ShardListResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use objectio_common::IndexPool;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

/// Reshard log entries removed by one trim call
pub const TRIM_BATCH: u64 = 1000;

/// Allocation unit used for rounded sizes
const ROUND_UNIT: u64 = 4096;

/// State of one directory object
#[derive(Clone, Debug, Default)]
struct ShardObject {
    header: DirHeader,
    entries: BTreeMap<ObjKey, DirEntry>,
    reshard: ReshardStatusEntry,
    reshard_log_enabled: bool,
    reshard_log_len: u64,
}

impl ShardObject {
    fn calculated_header(&self) -> DirHeader {
        let mut header = DirHeader {
            tag_timeout: self.header.tag_timeout,
            ver: self.header.ver,
            ..DirHeader::default()
        };
        for entry in self.entries.values().filter(|e| e.exists) {
            header
                .stats
                .entry(entry.meta.category)
                .or_default()
                .add(&entry_stats(entry));
        }
        header
    }

    fn list(&self, op: &ListOp, scan_budget: usize) -> OpResult {
        let mut out = ShardListResult {
            marker: op.marker.clone(),
            ..ShardListResult::default()
        };
        let max = op.max_entries as usize;
        let mut scanned = 0usize;
        let mut returned = 0usize;

        let range = self
            .entries
            .range::<ObjKey, _>((Bound::Excluded(&op.marker), Bound::Unbounded))
            .filter(|(key, _)| key.name.starts_with(&op.prefix));
        for (key, entry) in range {
            if returned >= max {
                out.is_truncated = true;
                break;
            }
            if scanned >= scan_budget {
                if returned == 0 {
                    return Err(OpError::AdvanceAndRetry { marker: out.marker });
                }
                out.is_truncated = true;
                break;
            }
            scanned += 1;
            out.marker = key.clone();

            if !op.delimiter.is_empty() {
                let rest = &key.name[op.prefix.len()..];
                if let Some(pos) = rest.find(&op.delimiter) {
                    let common = format!("{}{}", op.prefix, &rest[..pos + op.delimiter.len()]);
                    if out.common_prefixes.last() != Some(&common) {
                        out.common_prefixes.push(common);
                        returned += 1;
                    }
                    continue;
                }
            }
            if !entry.exists && !op.list_versions {
                continue;
            }
            out.entries.push(entry.clone());
            returned += 1;
        }
        wire::encode("list result", &out).map_err(|e| OpError::Io(e.to_string()))
    }
}

fn entry_stats(entry: &DirEntry) -> CategoryStats {
    CategoryStats {
        num_entries: 1,
        total_size: entry.meta.size,
        total_size_rounded: entry.meta.size.div_ceil(ROUND_UNIT) * ROUND_UNIT,
    }
}

/// An injected failure
#[derive(Clone, Debug)]
struct Fault {
    oid: String,
    kind: OpKind,
    error: OpError,
    /// `None` fails forever
    remaining: Option<u32>,
}

/// Process-local index transport
pub struct MemoryTransport {
    objects: Mutex<HashMap<(IndexPool, String), ShardObject>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<(String, OpKind)>>,
    latency: Duration,
    jitter: Duration,
    supports_reshard_log: bool,
    list_scan_budget: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Transport with no latency and no faults
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            supports_reshard_log: true,
            list_scan_budget: usize::MAX,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every operation by `latency` plus a random share of `jitter`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.latency = latency;
        self.jitter = jitter;
        self
    }

    /// Emulate OSDs that predate reshard logging
    #[must_use]
    pub fn without_reshard_log(mut self) -> Self {
        self.supports_reshard_log = false;
        self
    }

    /// Raw entries a listing may examine before asking the caller to
    /// advance and retry
    #[must_use]
    pub fn with_list_scan_budget(mut self, budget: usize) -> Self {
        self.list_scan_budget = budget;
        self
    }

    /// Fail the next `times` operations of `kind` on `oid`
    pub fn fail(&self, oid: impl Into<String>, kind: OpKind, error: OpError, times: u32) {
        self.faults.lock().push(Fault {
            oid: oid.into(),
            kind,
            error,
            remaining: Some(times),
        });
    }

    /// Fail every operation of `kind` on `oid`
    pub fn fail_always(&self, oid: impl Into<String>, kind: OpKind, error: OpError) {
        self.faults.lock().push(Fault {
            oid: oid.into(),
            kind,
            error,
            remaining: None,
        });
    }

    /// Drop all injected failures
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Whether a directory object exists
    #[must_use]
    pub fn exists(&self, pool: &IndexPool, oid: &str) -> bool {
        self.objects.lock().contains_key(&(pool.clone(), oid.to_string()))
    }

    /// Names of all objects in a pool, sorted
    #[must_use]
    pub fn object_names(&self, pool: &IndexPool) -> Vec<String> {
        let mut names: Vec<_> = self
            .objects
            .lock()
            .keys()
            .filter(|(p, _)| p == pool)
            .map(|(_, oid)| oid.clone())
            .collect();
        names.sort();
        names
    }

    /// Stored header of an object
    #[must_use]
    pub fn header(&self, pool: &IndexPool, oid: &str) -> Option<DirHeader> {
        self.objects
            .lock()
            .get(&(pool.clone(), oid.to_string()))
            .map(|o| o.header.clone())
    }

    /// Overwrite the stored header, leaving entries alone
    pub fn set_header(&self, pool: &IndexPool, oid: &str, header: DirHeader) -> Result<(), OpError> {
        self.with_object(pool, oid, |obj| obj.header = header)
    }

    /// Insert an entry and account it in the header
    pub fn put_entry(&self, pool: &IndexPool, oid: &str, entry: DirEntry) -> Result<(), OpError> {
        self.with_object(pool, oid, |obj| {
            if entry.exists {
                obj.header
                    .stats
                    .entry(entry.meta.category)
                    .or_default()
                    .add(&entry_stats(&entry));
            }
            obj.header.ver += 1;
            obj.entries.insert(entry.key.clone(), entry);
        })
    }

    /// Append reshard log entries to an object
    pub fn append_reshard_log(&self, pool: &IndexPool, oid: &str, count: u64) -> Result<(), OpError> {
        self.with_object(pool, oid, |obj| obj.reshard_log_len += count)
    }

    /// Pending reshard log entries of an object
    #[must_use]
    pub fn reshard_log_len(&self, pool: &IndexPool, oid: &str) -> Option<u64> {
        self.objects
            .lock()
            .get(&(pool.clone(), oid.to_string()))
            .map(|o| o.reshard_log_len)
    }

    /// Number of operations of `kind` executed against `oid`
    #[must_use]
    pub fn calls(&self, oid: &str, kind: OpKind) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(o, k)| o == oid && *k == kind)
            .count()
    }

    /// Total number of operations executed
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of operations observed in flight at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn with_object(
        &self,
        pool: &IndexPool,
        oid: &str,
        f: impl FnOnce(&mut ShardObject),
    ) -> Result<(), OpError> {
        let mut objects = self.objects.lock();
        let obj = objects
            .get_mut(&(pool.clone(), oid.to_string()))
            .ok_or(OpError::NotFound)?;
        f(obj);
        Ok(())
    }

    fn take_fault(&self, oid: &str, kind: OpKind) -> Option<OpError> {
        let mut faults = self.faults.lock();
        let pos = faults
            .iter()
            .position(|f| f.oid == oid && f.kind == kind && f.remaining != Some(0))?;
        let fault = &mut faults[pos];
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(pos);
            }
        }
        Some(error)
    }

    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let jitter_us = u64::try_from(self.jitter.as_micros()).unwrap_or(u64::MAX);
        self.latency + Duration::from_micros(rand::thread_rng().gen_range(0..=jitter_us))
    }

    fn apply(&self, pool: &IndexPool, oid: &str, op: IndexOp) -> OpResult {
        let mut objects = self.objects.lock();
        let key = (pool.clone(), oid.to_string());
        match op {
            IndexOp::Init {
                exclusive,
                reshard_log,
            } => {
                if exclusive && objects.contains_key(&key) {
                    return Err(OpError::AlreadyExists);
                }
                if reshard_log && !self.supports_reshard_log {
                    return Err(OpError::NotSupported);
                }
                objects.insert(
                    key,
                    ShardObject {
                        reshard_log_enabled: reshard_log,
                        ..ShardObject::default()
                    },
                );
                Ok(Bytes::new())
            }
            IndexOp::Remove => objects
                .remove(&key)
                .map(|_| Bytes::new())
                .ok_or(OpError::NotFound),
            other => {
                let obj = objects.get_mut(&key).ok_or(OpError::NotFound)?;
                self.apply_existing(obj, other)
            }
        }
    }

    fn apply_existing(&self, obj: &mut ShardObject, op: IndexOp) -> OpResult {
        let encode_err = |e: objectio_common::Error| OpError::Io(e.to_string());
        match op {
            IndexOp::ReadHeader => wire::encode("dir header", &obj.header).map_err(encode_err),
            IndexOp::List(list) => obj.list(&list, self.list_scan_budget),
            IndexOp::GetReshardStatus => {
                wire::encode("reshard status", &obj.reshard).map_err(encode_err)
            }
            IndexOp::SetReshardStatus(status) => {
                obj.reshard.reshard_status = status;
                if status == ReshardStatus::InLogrecord {
                    obj.reshard_log_enabled |= self.supports_reshard_log;
                }
                Ok(Bytes::new())
            }
            IndexOp::TrimReshardLog => {
                if obj.reshard_log_len == 0 {
                    return Err(OpError::NoData);
                }
                obj.reshard_log_len -= obj.reshard_log_len.min(TRIM_BATCH);
                Ok(Bytes::new())
            }
            IndexOp::SetTagTimeout(timeout) => {
                obj.header.tag_timeout = timeout;
                Ok(Bytes::new())
            }
            IndexOp::CheckIndex => {
                let result = CheckIndexResult {
                    existing_header: obj.header.clone(),
                    calculated_header: obj.calculated_header(),
                };
                wire::encode("check result", &result).map_err(encode_err)
            }
            IndexOp::RebuildIndex => {
                obj.header = obj.calculated_header();
                Ok(Bytes::new())
            }
            // Create and remove never reach an existing-object handler
            IndexOp::Init { .. } | IndexOp::Remove => Err(OpError::NotSupported),
        }
    }
}

#[async_trait]
impl IndexTransport for MemoryTransport {
    async fn execute(&self, pool: &IndexPool, oid: &str, op: IndexOp) -> OpResult {
        let kind = op.kind();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push((oid.to_string(), kind));

        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match self.take_fault(oid, kind) {
            Some(error) => Err(error),
            None => self.apply(pool, oid, op),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        trace!(pool = %pool, oid, op = %kind, ok = result.is_ok(), "memory transport op");
        result
    }
}
