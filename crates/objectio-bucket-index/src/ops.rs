//! Per-shard behaviors for bucket-wide index calls

use crate::shard_io::{Outcome, ShardOp};
use bytes::Bytes;
use objectio_client::{
    IndexOp, ListOp, ObjKey, OpError, OpResult, ReshardStatus, ShardListResult, wire,
};
use objectio_common::Error;

/// Classify a read whose payload is kept in the slot
fn store_payload(slot: &mut Bytes, result: OpResult, missing_ok: bool) -> Outcome {
    match result {
        Ok(payload) => {
            *slot = payload;
            Outcome::Success
        }
        Err(OpError::NotFound) if missing_ok => Outcome::Success,
        Err(e) => Outcome::Error(e.into()),
    }
}

/// Create every shard object exclusively
///
/// Shards that already exist count as created. Revertible: on failure every
/// shard this call created is removed again.
pub struct IndexInitWriter {
    /// Also enable the reshard log; old OSDs reject this
    pub judge_support_logrecord: bool,
}

impl ShardOp for IndexInitWriter {
    type Slot = ();

    fn name(&self) -> &'static str {
        "init index shards"
    }

    fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
        IndexOp::Init {
            exclusive: true,
            reshard_log: self.judge_support_logrecord,
        }
    }

    fn on_complete(&self, _shard: u32, _slot: &mut (), result: OpResult) -> Outcome {
        match result {
            Ok(_) | Err(OpError::AlreadyExists) => Outcome::Success,
            Err(e) => Outcome::Error(e.into()),
        }
    }

    fn prepare_revert(&self, _shard: u32) -> Option<IndexOp> {
        Some(IndexOp::Remove)
    }
}

/// Delete every shard object; missing shards count as deleted
pub struct IndexCleanWriter;

impl ShardOp for IndexCleanWriter {
    type Slot = ();

    fn name(&self) -> &'static str {
        "clean index shards"
    }

    fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
        IndexOp::Remove
    }

    fn on_complete(&self, _shard: u32, _slot: &mut (), result: OpResult) -> Outcome {
        match result {
            Ok(_) | Err(OpError::NotFound) => Outcome::Success,
            Err(e) => Outcome::Error(e.into()),
        }
    }
}

/// Read shard headers; a missing shard leaves an empty payload
pub struct IndexHeadReader;

impl ShardOp for IndexHeadReader {
    type Slot = Bytes;

    fn name(&self) -> &'static str {
        "read index headers"
    }

    fn prepare(&self, _shard: u32, _slot: &mut Bytes) -> IndexOp {
        IndexOp::ReadHeader
    }

    fn on_complete(&self, _shard: u32, slot: &mut Bytes, result: OpResult) -> Outcome {
        store_payload(slot, result, true)
    }
}

/// Paged listing across shards
///
/// Each shard resumes from its own marker. When a shard reports partial
/// progress it is resubmitted from the new marker; a marker that does not
/// move forward fails the call instead of looping.
pub struct ListReader<'a> {
    pub start: &'a ObjKey,
    pub prefix: &'a str,
    pub delimiter: &'a str,
    pub max_entries: u32,
    pub list_versions: bool,
}

impl ListReader<'_> {
    fn resume_from<'s>(&'s self, slot: &'s ShardListResult) -> &'s ObjKey {
        if slot.marker.is_empty() {
            self.start
        } else {
            &slot.marker
        }
    }
}

impl ShardOp for ListReader<'_> {
    type Slot = ShardListResult;

    fn name(&self) -> &'static str {
        "list index shards"
    }

    fn prepare(&self, _shard: u32, slot: &mut ShardListResult) -> IndexOp {
        IndexOp::List(ListOp {
            marker: self.resume_from(slot).clone(),
            prefix: self.prefix.to_string(),
            delimiter: self.delimiter.to_string(),
            max_entries: self.max_entries,
            list_versions: self.list_versions,
        })
    }

    fn on_complete(&self, shard: u32, slot: &mut ShardListResult, result: OpResult) -> Outcome {
        match result {
            Ok(payload) => match wire::decode("list result", &payload) {
                Ok(page) => {
                    *slot = page;
                    Outcome::Success
                }
                Err(e) => Outcome::Error(e),
            },
            Err(OpError::AdvanceAndRetry { marker }) => {
                let previous = self.resume_from(slot);
                if marker <= *previous {
                    return Outcome::Error(Error::internal(format!(
                        "shard {shard} listing stalled at '{previous}'"
                    )));
                }
                *slot = ShardListResult {
                    marker,
                    ..ShardListResult::default()
                };
                Outcome::Retry
            }
            Err(e) => Outcome::Error(e.into()),
        }
    }
}

/// Read per-shard reshard status; a missing shard reads as not resharding
pub struct ReshardStatusReader;

impl ShardOp for ReshardStatusReader {
    type Slot = Bytes;

    fn name(&self) -> &'static str {
        "get reshard status"
    }

    fn prepare(&self, _shard: u32, _slot: &mut Bytes) -> IndexOp {
        IndexOp::GetReshardStatus
    }

    fn on_complete(&self, _shard: u32, slot: &mut Bytes, result: OpResult) -> Outcome {
        store_payload(slot, result, true)
    }
}

pub struct ReshardStatusWriter {
    pub status: ReshardStatus,
}

impl ShardOp for ReshardStatusWriter {
    type Slot = ();

    fn name(&self) -> &'static str {
        "set reshard status"
    }

    fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
        IndexOp::SetReshardStatus(self.status)
    }
}

/// Trim the reshard log in batches until each shard reports no data
pub struct ReshardTrimWriter;

impl ShardOp for ReshardTrimWriter {
    /// Batches removed so far
    type Slot = u32;

    fn name(&self) -> &'static str {
        "trim reshard log"
    }

    fn prepare(&self, _shard: u32, _slot: &mut u32) -> IndexOp {
        IndexOp::TrimReshardLog
    }

    fn on_complete(&self, _shard: u32, slot: &mut u32, result: OpResult) -> Outcome {
        match result {
            Ok(_) => {
                *slot += 1;
                Outcome::Retry
            }
            Err(OpError::NoData) => Outcome::Success,
            Err(e) => Outcome::Error(e.into()),
        }
    }
}

pub struct TagTimeoutWriter {
    pub timeout: u64,
}

impl ShardOp for TagTimeoutWriter {
    type Slot = ();

    fn name(&self) -> &'static str {
        "set tag timeout"
    }

    fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
        IndexOp::SetTagTimeout(self.timeout)
    }
}

/// Compare stored and recomputed headers
pub struct CheckReader;

impl ShardOp for CheckReader {
    type Slot = Bytes;

    fn name(&self) -> &'static str {
        "check index"
    }

    fn prepare(&self, _shard: u32, _slot: &mut Bytes) -> IndexOp {
        IndexOp::CheckIndex
    }

    fn on_complete(&self, _shard: u32, slot: &mut Bytes, result: OpResult) -> Outcome {
        store_payload(slot, result, false)
    }
}

/// Recompute and store shard headers
pub struct RebuildWriter;

impl ShardOp for RebuildWriter {
    type Slot = ();

    fn name(&self) -> &'static str {
        "rebuild index"
    }

    fn prepare(&self, _shard: u32, _slot: &mut ()) -> IndexOp {
        IndexOp::RebuildIndex
    }
}
