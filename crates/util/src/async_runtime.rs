//! Async runtime helpers for blocking callers.
//!
//! The engine is synchronous; the HTTP client is async. This module runs a future to
//! completion from either side of that boundary.

use std::future::Future;

use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::task;

/// Execute an async future from synchronous code.
///
/// - Inside a multi-thread Tokio runtime the current worker is handed off with
///   `block_in_place` and the existing runtime drives the future.
/// - Inside a current-thread runtime, blocking the only worker would deadlock, so the
///   future runs on a scoped thread with its own runtime.
/// - Outside Tokio a single-threaded runtime is built for the call.
pub fn block_on_future<F>(future: F) -> std::io::Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(task::block_in_place(|| handle.block_on(future)))
        }
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| run_on_fresh_runtime(future))
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("runtime thread panicked")))
        }),
        Err(_) => run_on_fresh_runtime(future),
    }
}

fn run_on_fresh_runtime<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
