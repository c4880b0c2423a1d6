//! Index records exchanged with directory objects
//!
//! Payloads travel as opaque bytes; these are the structured records they
//! decode into.

use bytes::Bytes;
use objectio_common::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Object category tracked in directory headers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjCategory {
    None,
    /// Regular user objects; the only category reported as bucket usage
    #[default]
    Main,
    Shadow,
    MultiMeta,
}

/// Usage counters for one category
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub num_entries: u64,
    pub total_size: u64,
    pub total_size_rounded: u64,
}

impl CategoryStats {
    pub fn add(&mut self, other: &Self) {
        self.num_entries += other.num_entries;
        self.total_size += other.total_size;
        self.total_size_rounded += other.total_size_rounded;
    }
}

/// Per-shard directory header
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirHeader {
    pub stats: BTreeMap<ObjCategory, CategoryStats>,
    /// Pending-operation tag timeout in seconds (0 = server default)
    pub tag_timeout: u64,
    pub ver: u64,
}

/// Directory entry key
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjKey {
    pub name: String,
    #[serde(default)]
    pub instance: String,
}

impl ObjKey {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: String::new(),
        }
    }

    /// An empty key means "from the beginning"
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.instance.is_empty()
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.instance)
        }
    }
}

/// Object metadata kept in a directory entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub category: ObjCategory,
    pub size: u64,
    pub etag: String,
}

/// One directory entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub key: ObjKey,
    /// False for delete markers and pending entries
    pub exists: bool,
    pub meta: EntryMeta,
}

impl DirEntry {
    /// Visible main-category entry
    #[must_use]
    pub fn object(name: impl Into<String>, size: u64) -> Self {
        Self {
            key: ObjKey::new(name),
            exists: true,
            meta: EntryMeta {
                category: ObjCategory::Main,
                size,
                etag: String::new(),
            },
        }
    }
}

/// One page of a shard listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardListResult {
    pub entries: Vec<DirEntry>,
    /// Prefixes rolled up by the delimiter
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key examined; resume point for the next page
    pub marker: ObjKey,
}

/// Resharding state of a shard
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReshardStatus {
    #[default]
    NotResharding,
    InLogrecord,
    InProgress,
    Done,
}

/// Per-shard resharding record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshardStatusEntry {
    pub reshard_status: ReshardStatus,
}

/// Header stored on a shard next to the one recomputed from its entries
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIndexResult {
    pub existing_header: DirHeader,
    pub calculated_header: DirHeader,
}

/// Encode a record into a payload
pub fn encode<T: Serialize>(what: &'static str, record: &T) -> Result<Bytes, Error> {
    bincode::serialize(record)
        .map(Bytes::from)
        .map_err(|e| Error::Internal(format!("failed to encode {what}: {e}")))
}

/// Decode a payload into a record
pub fn decode<T: DeserializeOwned>(what: &'static str, payload: &[u8]) -> Result<T, Error> {
    bincode::deserialize(payload).map_err(|e| Error::decode(what, e))
}

/// Decode a payload, treating an empty payload as the default record
pub fn decode_or_default<T: DeserializeOwned + Default>(what: &'static str, payload: &[u8]) -> Result<T, Error> {
    if payload.is_empty() {
        Ok(T::default())
    } else {
        decode(what, payload)
    }
}
