//! Remote index operations and their status codes

use crate::wire::{ObjKey, ReshardStatus};
use bytes::Bytes;
use objectio_common::Error;
use std::fmt;
use thiserror::Error;

/// One operation against a single directory object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexOp {
    /// Create the object and initialize an empty index in it
    Init {
        /// Fail with `AlreadyExists` instead of overwriting
        exclusive: bool,
        /// Also enable reshard logging; fails with `NotSupported` on old OSDs
        reshard_log: bool,
    },
    Remove,
    ReadHeader,
    List(ListOp),
    GetReshardStatus,
    SetReshardStatus(ReshardStatus),
    /// Remove one batch of reshard log entries
    TrimReshardLog,
    SetTagTimeout(u64),
    CheckIndex,
    RebuildIndex,
}

/// Parameters of a shard listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOp {
    /// Resume after this key (empty = from the beginning)
    pub marker: ObjKey,
    pub prefix: String,
    pub delimiter: String,
    pub max_entries: u32,
    pub list_versions: bool,
}

/// Operation discriminant, used for logging and fault matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Init,
    Remove,
    ReadHeader,
    List,
    GetReshardStatus,
    SetReshardStatus,
    TrimReshardLog,
    SetTagTimeout,
    CheckIndex,
    RebuildIndex,
}

impl IndexOp {
    #[must_use]
    pub const fn kind(&self) -> OpKind {
        match self {
            Self::Init { .. } => OpKind::Init,
            Self::Remove => OpKind::Remove,
            Self::ReadHeader => OpKind::ReadHeader,
            Self::List(_) => OpKind::List,
            Self::GetReshardStatus => OpKind::GetReshardStatus,
            Self::SetReshardStatus(_) => OpKind::SetReshardStatus,
            Self::TrimReshardLog => OpKind::TrimReshardLog,
            Self::SetTagTimeout(_) => OpKind::SetTagTimeout,
            Self::CheckIndex => OpKind::CheckIndex,
            Self::RebuildIndex => OpKind::RebuildIndex,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Remove => "remove",
            Self::ReadHeader => "read_header",
            Self::List => "list",
            Self::GetReshardStatus => "get_reshard_status",
            Self::SetReshardStatus => "set_reshard_status",
            Self::TrimReshardLog => "trim_reshard_log",
            Self::SetTagTimeout => "set_tag_timeout",
            Self::CheckIndex => "check_index",
            Self::RebuildIndex => "rebuild_index",
        };
        f.write_str(name)
    }
}

/// Status returned by a directory object
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("no such object")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("no data available")]
    NoData,

    /// Partial progress; resubmit starting after `marker`
    #[error("advance and retry from '{marker}'")]
    AdvanceAndRetry { marker: ObjKey },

    #[error("operation not supported")]
    NotSupported,

    #[error("timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(String),
}

/// Outcome of one remote operation: payload on success
pub type OpResult = std::result::Result<Bytes, OpError>;

impl From<OpError> for Error {
    fn from(e: OpError) -> Self {
        match e {
            OpError::NotFound => Self::NotFound("index object".into()),
            OpError::AlreadyExists => Self::AlreadyExists("index object".into()),
            OpError::NotSupported => Self::Unsupported("index operation".into()),
            OpError::Timeout => Self::Timeout,
            other => Self::Remote(other.to_string()),
        }
    }
}
