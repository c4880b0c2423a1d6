//! ObjectIO Client - bucket index transport
//!
//! This crate describes the operations a gateway sends to bucket index
//! objects, the records they exchange, and the transport that carries them.

pub mod memory;
pub mod op;
pub mod transport;
pub mod wire;

// Re-exports
pub use memory::MemoryTransport;
pub use op::{IndexOp, ListOp, OpError, OpKind, OpResult};
pub use transport::IndexTransport;
pub use wire::{
    CategoryStats, CheckIndexResult, DirEntry, DirHeader, EntryMeta, ObjCategory, ObjKey,
    ReshardStatus, ReshardStatusEntry, ShardListResult,
};
