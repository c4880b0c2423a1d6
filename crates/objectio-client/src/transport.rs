//! Transport used to reach directory objects

use crate::op::{IndexOp, OpResult};
use async_trait::async_trait;
use objectio_common::IndexPool;

/// Executes single operations against addressed directory objects
///
/// Implementations must tolerate many concurrent calls; callers bound the
/// number they keep in flight.
#[async_trait]
pub trait IndexTransport: Send + Sync {
    /// Run `op` against object `oid` in `pool`
    async fn execute(&self, pool: &IndexPool, oid: &str, op: IndexOp) -> OpResult;
}
