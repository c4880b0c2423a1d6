//! Sharded operation engine
//!
//! Runs one [`ShardOp`] against every shard of a [`ShardMap`] with at most
//! `max_aio` operations in flight. Each shard is driven to a terminal outcome:
//!
//! ```text
//!   ready ──prepare──▶ in flight ──on_complete──▶ Success  (done)
//!     ▲                                  │
//!     └────────────── Retry ◀────────────┤
//!                                        └──────▶ Error    (abort call)
//! ```
//!
//! Completions are processed in arrival order, and a shard is never
//! prepared again before its previous attempt has been classified. The
//! first error observed aborts the call: nothing new is submitted and
//! operations already in flight drain with their outcomes discarded. If the
//! operation can be reverted, every shard that succeeded is then reverted
//! before the error is returned.
//!
//! Per-shard state lives in a slot owned by the caller's map and is only
//! touched from the driver loop, so concurrent shards never alias it.

use futures::stream::{FuturesUnordered, StreamExt};
use objectio_client::{IndexOp, IndexTransport, OpResult};
use objectio_common::{Error, IndexPool, Result};
use objectio_placement::ShardMap;
use std::collections::{BTreeMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Verdict on one completed attempt
#[derive(Debug)]
pub enum Outcome {
    /// The shard is done
    Success,
    /// Prepare and submit the shard again
    Retry,
    /// Abort the whole call with this error
    Error(Error),
}

/// Per-shard behavior plugged into the engine
pub trait ShardOp: Sync {
    /// State kept for each shard across attempts, returned to the caller
    type Slot: Default + Send;

    /// Log prefix
    fn name(&self) -> &'static str;

    /// Build the next attempt for `shard`
    fn prepare(&self, shard: u32, slot: &mut Self::Slot) -> IndexOp;

    /// Classify a completed attempt
    fn on_complete(&self, _shard: u32, _slot: &mut Self::Slot, result: OpResult) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Error(e.into()),
        }
    }

    /// Operation undoing a successful attempt; `None` if not revertible
    fn prepare_revert(&self, _shard: u32) -> Option<IndexOp> {
        None
    }
}

/// One engine invocation's fixed parameters
pub struct ShardIo<'a> {
    transport: &'a dyn IndexTransport,
    pool: &'a IndexPool,
    max_aio: usize,
    cancel: &'a CancellationToken,
}

impl<'a> ShardIo<'a> {
    pub fn new(
        transport: &'a dyn IndexTransport,
        pool: &'a IndexPool,
        max_aio: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            pool,
            max_aio: max_aio.max(1),
            cancel,
        }
    }

    /// Drive `op` over all shards of `objs`
    ///
    /// `slots` receives one entry per addressed shard, including on error.
    pub async fn run<B: ShardOp>(
        &self,
        objs: &ShardMap,
        op: &B,
        slots: &mut BTreeMap<u32, B::Slot>,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let transport = self.transport;
        let pool = self.pool;
        let mut ready: VecDeque<u32> = objs.keys().copied().collect();
        let mut pending = FuturesUnordered::new();
        let mut succeeded = Vec::new();
        let mut failure: Option<Error> = None;
        let mut cancelled = false;

        loop {
            while failure.is_none() && !cancelled && pending.len() < self.max_aio {
                if self.cancel.is_cancelled() {
                    warn!(
                        in_flight = pending.len(),
                        "{}: cancelled, draining in-flight shards",
                        op.name()
                    );
                    cancelled = true;
                    break;
                }
                let Some(shard) = ready.pop_front() else {
                    break;
                };
                let Some(oid) = objs.get(&shard) else {
                    continue;
                };
                let request = op.prepare(shard, slots.entry(shard).or_default());
                trace!(shard, oid = %oid, op = %request.kind(), "{}: submit", op.name());
                pending.push(async move {
                    let result = transport.execute(pool, oid, request).await;
                    (shard, result)
                });
            }

            let in_flight = pending.len();
            let completion = tokio::select! {
                biased;
                () = self.cancel.cancelled(), if in_flight > 0 && !cancelled && failure.is_none() => {
                    warn!(in_flight, "{}: cancelled, draining in-flight shards", op.name());
                    cancelled = true;
                    continue;
                }
                completion = pending.next() => completion,
            };
            let Some((shard, result)) = completion else {
                break;
            };

            let aborted = failure.is_some() || cancelled;
            match op.on_complete(shard, slots.entry(shard).or_default(), result) {
                Outcome::Success => succeeded.push(shard),
                Outcome::Retry if aborted => {}
                Outcome::Retry => {
                    debug!(shard, "{}: retry", op.name());
                    ready.push_back(shard);
                }
                Outcome::Error(e) if aborted => {
                    debug!(shard, error = %e, "{}: discarding failure after abort", op.name());
                }
                Outcome::Error(e) => {
                    error!(
                        shard,
                        oid = objs.get(&shard).map_or("", String::as_str),
                        error = %e,
                        "{}: shard failed",
                        op.name()
                    );
                    failure = Some(e);
                }
            }
        }

        let err = match failure {
            Some(e) => e,
            None if cancelled => Error::Cancelled,
            None => return Ok(()),
        };
        self.revert(objs, op, &succeeded).await;
        Err(err)
    }

    /// Best-effort revert of shards that succeeded; failures are only logged
    async fn revert<B: ShardOp>(&self, objs: &ShardMap, op: &B, shards: &[u32]) {
        let reverts: Vec<_> = shards
            .iter()
            .filter_map(|&shard| {
                let request = op.prepare_revert(shard)?;
                let oid = objs.get(&shard)?;
                Some((shard, oid, request))
            })
            .collect();
        if reverts.is_empty() {
            return;
        }
        warn!(shards = reverts.len(), "{}: reverting completed shards", op.name());

        let transport = self.transport;
        let pool = self.pool;
        let mut reverts = reverts.into_iter();
        let mut pending = FuturesUnordered::new();
        loop {
            while pending.len() < self.max_aio {
                let Some((shard, oid, request)) = reverts.next() else {
                    break;
                };
                pending.push(async move {
                    let result = transport.execute(pool, oid, request).await;
                    (shard, oid, result)
                });
            }
            let Some((shard, oid, result)) = pending.next().await else {
                break;
            };
            if let Err(e) = result {
                error!(shard, oid = %oid, error = %e, "{}: revert failed", op.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use objectio_client::{OpError, OpKind};
    use objectio_common::IndexLayoutGeneration;
    use objectio_placement::{ShardFilter, build_shard_map};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport replaying scripted results per object
    #[derive(Default)]
    struct Scripted {
        scripts: Mutex<HashMap<String, VecDeque<OpResult>>>,
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<(String, OpKind)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn script(&self, oid: &str, results: Vec<OpResult>) {
            self.scripts.lock().insert(oid.to_string(), results.into());
        }

        fn attempts(&self, oid: &str, kind: OpKind) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|(o, k)| o == oid && *k == kind)
                .count()
        }
    }

    #[async_trait]
    impl IndexTransport for Scripted {
        async fn execute(&self, _pool: &IndexPool, oid: &str, op: IndexOp) -> OpResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().push((oid.to_string(), op.kind()));
            let delay = self.delays.get(oid).copied().unwrap_or(Duration::from_millis(1));
            tokio::time::sleep(delay).await;
            let result = self
                .scripts
                .lock()
                .get_mut(oid)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(Bytes::new()));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Plain write; revertible when asked
    struct Touch {
        revertible: bool,
    }

    impl ShardOp for Touch {
        type Slot = u32;

        fn name(&self) -> &'static str {
            "touch shards"
        }

        fn prepare(&self, _shard: u32, slot: &mut u32) -> IndexOp {
            *slot += 1;
            IndexOp::SetTagTimeout(u64::from(*slot))
        }

        fn prepare_revert(&self, _shard: u32) -> Option<IndexOp> {
            self.revertible.then_some(IndexOp::Remove)
        }
    }

    /// Ok means "more to do" until the shard reports no data
    struct Drain;

    impl ShardOp for Drain {
        type Slot = ();

        fn name(&self) -> &'static str {
            "drain shards"
        }

        fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
            IndexOp::TrimReshardLog
        }

        fn on_complete(&self, _shard: u32, _slot: &mut (), result: OpResult) -> Outcome {
            match result {
                Ok(_) => Outcome::Retry,
                Err(OpError::NoData) => Outcome::Success,
                Err(e) => Outcome::Error(e.into()),
            }
        }
    }

    fn shards(n: u32) -> ShardMap {
        build_shard_map(".dir.t", &IndexLayoutGeneration::normal(0, n), ShardFilter::All)
    }

    fn pool() -> IndexPool {
        IndexPool::new("index")
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_shards_succeed() {
        let transport = Scripted::default();
        let pool = pool();
        let cancel = CancellationToken::new();
        let objs = shards(4);
        let mut slots = BTreeMap::new();

        ShardIo::new(&transport, &pool, 8, &cancel)
            .run(&objs, &Touch { revertible: false }, &mut slots)
            .await
            .unwrap();

        assert_eq!(slots.len(), 4);
        assert!(slots.values().all(|&attempts| attempts == 1));
        for oid in objs.values() {
            assert_eq!(transport.attempts(oid, OpKind::SetTagTimeout), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_bounds_in_flight() {
        let mut transport = Scripted::default();
        let objs = shards(5);
        for (shard, oid) in &objs {
            // Uneven delays so completions arrive out of shard order
            let ms = [30, 5, 20, 10, 1][*shard as usize];
            transport.delays.insert(oid.clone(), Duration::from_millis(ms));
        }
        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();

        ShardIo::new(&transport, &pool, 2, &cancel)
            .run(&objs, &Touch { revertible: false }, &mut slots)
            .await
            .unwrap();

        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls.lock().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_terminal() {
        let transport = Scripted::default();
        let objs = shards(1);
        let oid = &objs[&0];
        let n = 4;
        let mut script: Vec<OpResult> = (0..n).map(|_| Ok(Bytes::new())).collect();
        script.push(Err(OpError::NoData));
        transport.script(oid, script);

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&objs, &Drain, &mut slots)
            .await
            .unwrap();

        assert_eq!(transport.attempts(oid, OpKind::TrimReshardLog), n + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stops_new_submissions() {
        let transport = Scripted::default();
        let objs = shards(4);
        transport.script(&objs[&1], vec![Err(OpError::Io("bad sector".into()))]);

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        let err = ShardIo::new(&transport, &pool, 1, &cancel)
            .run(&objs, &Touch { revertible: false }, &mut slots)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(ref msg) if msg.contains("bad sector")));
        assert_eq!(transport.attempts(&objs[&2], OpKind::SetTagTimeout), 0);
        assert_eq!(transport.attempts(&objs[&3], OpKind::SetTagTimeout), 0);
        // Not revertible: nothing removed
        assert_eq!(transport.calls.lock().iter().filter(|(_, k)| *k == OpKind::Remove).count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reverts_completed_shards() {
        let mut transport = Scripted::default();
        let objs = shards(4);
        // Shard 2 fails last so every other shard has completed
        transport.delays.insert(objs[&2].clone(), Duration::from_millis(50));
        transport.script(&objs[&2], vec![Err(OpError::Io("enospc".into()))]);

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        let err = ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&objs, &Touch { revertible: true }, &mut slots)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(_)));
        for shard in [0, 1, 3] {
            assert_eq!(transport.attempts(&objs[&shard], OpKind::Remove), 1);
        }
        assert_eq!(transport.attempts(&objs[&2], OpKind::Remove), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_success_after_abort_is_reverted() {
        let mut transport = Scripted::default();
        let objs = shards(3);
        // Shard 0 fails first while shard 1 is still in flight
        transport.script(&objs[&0], vec![Err(OpError::Io("first".into()))]);
        transport.delays.insert(objs[&1].clone(), Duration::from_millis(40));

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        ShardIo::new(&transport, &pool, 2, &cancel)
            .run(&objs, &Touch { revertible: true }, &mut slots)
            .await
            .unwrap_err();

        assert_eq!(transport.attempts(&objs[&1], OpKind::Remove), 1);
        // Shard 2 was never submitted
        assert_eq!(transport.attempts(&objs[&2], OpKind::SetTagTimeout), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_error_by_completion_order() {
        let mut transport = Scripted::default();
        let objs = shards(4);
        transport.delays.insert(objs[&0].clone(), Duration::from_millis(40));
        transport.script(&objs[&0], vec![Err(OpError::Io("slow shard".into()))]);
        transport.script(&objs[&3], vec![Err(OpError::Io("fast shard".into()))]);

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        let err = ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&objs, &Touch { revertible: false }, &mut slots)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(ref msg) if msg.contains("fast shard")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let transport = Scripted::default();
        let pool = pool();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut slots = BTreeMap::new();

        let err = ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&shards(3), &Touch { revertible: false }, &mut slots)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transport.calls.lock().is_empty());
    }

    /// Cancels the call when shard 1 is prepared
    struct CancelOnSecond<'a> {
        cancel: &'a CancellationToken,
    }

    impl ShardOp for CancelOnSecond<'_> {
        type Slot = ();

        fn name(&self) -> &'static str {
            "cancel test"
        }

        fn prepare(&self, shard: u32, _slot: &mut ()) -> IndexOp {
            if shard == 1 {
                self.cancel.cancel();
            }
            IndexOp::RebuildIndex
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drains_in_flight() {
        let transport = Scripted::default();
        let pool = pool();
        let cancel = CancellationToken::new();
        let objs = shards(4);
        let mut slots = BTreeMap::new();

        let err = ShardIo::new(&transport, &pool, 1, &cancel)
            .run(&objs, &CancelOnSecond { cancel: &cancel }, &mut slots)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        // Shard 1 was already in flight and finished; later shards never ran
        assert_eq!(transport.attempts(&objs[&1], OpKind::RebuildIndex), 1);
        assert_eq!(transport.attempts(&objs[&2], OpKind::RebuildIndex), 0);
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_filling_wide_window() {
        let transport = Scripted::default();
        let pool = pool();
        let cancel = CancellationToken::new();
        let objs = shards(4);
        let mut slots = BTreeMap::new();

        let err = ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&objs, &CancelOnSecond { cancel: &cancel }, &mut slots)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.attempts(&objs[&0], OpKind::RebuildIndex), 1);
        assert_eq!(transport.attempts(&objs[&1], OpKind::RebuildIndex), 1);
        assert_eq!(transport.attempts(&objs[&2], OpKind::RebuildIndex), 0);
        assert_eq!(transport.attempts(&objs[&3], OpKind::RebuildIndex), 0);
        assert!(!slots.contains_key(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_respects_window() {
        let mut transport = Scripted::default();
        let objs = shards(5);
        transport.delays.insert(objs[&4].clone(), Duration::from_millis(50));
        transport.script(&objs[&4], vec![Err(OpError::Io("enospc".into()))]);

        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots = BTreeMap::new();
        ShardIo::new(&transport, &pool, 2, &cancel)
            .run(&objs, &Touch { revertible: true }, &mut slots)
            .await
            .unwrap_err();

        let removes = transport.calls.lock().iter().filter(|(_, k)| *k == OpKind::Remove).count();
        assert_eq!(removes, 4);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(transport.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_map_is_noop() {
        let transport = Scripted::default();
        let pool = pool();
        let cancel = CancellationToken::new();
        let mut slots: BTreeMap<u32, u32> = BTreeMap::new();

        ShardIo::new(&transport, &pool, 4, &cancel)
            .run(&ShardMap::new(), &Touch { revertible: true }, &mut slots)
            .await
            .unwrap();
        assert!(slots.is_empty());
        assert!(transport.calls.lock().is_empty());
    }
}
