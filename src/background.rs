//! The executor-agnostic "waitUntil" primitive background revalidation is
//! dispatched through (§5.1). `CacheCore` never spawns anything itself; it
//! hands the caller a boxed future and trusts the injected dispatcher to run
//! it to completion without surfacing failures as uncaught rejections.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use log::warn;

/// A boxed, `'static` future representing a background revalidation.
pub type PendingRevalidation = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs background work independently of the request that triggered it.
/// Implementations must ensure the future eventually runs to completion and
/// must not let a panic or error inside it escape as an uncaught rejection —
/// see §5's "Cancellation/timeouts" note.
///
/// `spawn` is `async` (rather than firing the future off from a sync
/// method) so the default implementation can genuinely await it inline
/// without reaching for a runtime's `block_on`, which would be unsound to
/// call from within an already-running async context.
#[async_trait]
pub trait BackgroundDispatcher: Send + Sync {
    /// Hands off `fut` to run, independently of whatever the caller does next.
    async fn spawn(&self, fut: PendingRevalidation);
}

/// The default dispatcher: awaits the future inline before `spawn` returns.
/// Correct but not actually concurrent with the caller — suitable for tests
/// and simple single-threaded contexts; production deployments should
/// inject a dispatcher that detaches the future onto the host runtime (e.g.
/// `tokio::spawn`) so `match`'s STALE path returns to the caller immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

#[async_trait]
impl BackgroundDispatcher for InlineDispatcher {
    async fn spawn(&self, fut: PendingRevalidation) {
        fut.await;
    }
}

/// Wraps a revalidation future so a failure inside it is logged rather than
/// silently dropped, matching §3.2's requirement that the default dispatcher
/// log background-revalidation failures at `warn` with the cache key.
pub fn logged(
    cache_key: String,
    fut: impl Future<Output = crate::error::Result<()>> + Send + 'static,
) -> PendingRevalidation {
    Box::pin(async move {
        if let Err(err) = fut.await {
            warn!("background revalidation failed for key {cache_key}: {err}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn inline_dispatcher_runs_future_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let fut: PendingRevalidation = Box::pin(async move {
            ran_clone.store(true, Ordering::SeqCst);
        });
        InlineDispatcher.spawn(fut).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn logged_swallows_error_after_warning() {
        let fut = logged("k".to_string(), async { Err(crate::error::CacheError::MissingBackend) });
        InlineDispatcher.spawn(fut).await;
    }
}
