//! Execution adapter
//!
//! Index calls are async and suspend cooperatively when awaited from a
//! runtime. Callers without a runtime go through [`block_on`], which drives
//! the same future to completion on a dedicated thread.

use objectio_common::{Error, Result};
use std::future::Future;
use tokio::runtime::{Builder, Handle};
use tracing::warn;

/// Warn when a blocking call is made from a runtime thread
///
/// Returns whether the warning was emitted.
pub fn maybe_warn_about_blocking() -> bool {
    if Handle::try_current().is_ok() {
        warn!("blocking bucket index call from a runtime thread; prefer the async API");
        true
    } else {
        false
    }
}

/// Run `fut` to completion and wait for its result
///
/// The future runs on a fresh current-thread runtime in a scoped thread, so
/// this is safe to call with or without an ambient runtime. Calling it from
/// a runtime worker still parks that worker for the duration.
pub fn block_on<F, T>(warn_on_blocking: bool, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send,
    T: Send,
{
    if warn_on_blocking {
        maybe_warn_about_blocking();
    }

    std::thread::scope(|scope| {
        let worker = scope.spawn(move || {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::internal(format!("failed to start blocking runtime: {e}")))?;
            runtime.block_on(fut)
        });
        worker
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}
