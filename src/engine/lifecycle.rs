// One-time engine initialization shared across concurrent callers.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::native::NativeSplatEngine;
use super::traits::DecodeEngine;
use crate::config::LoaderConfig;
use crate::error::InitializationError;

type InitResult = Result<Arc<dyn DecodeEngine>, InitializationError>;
type InitFuture = Shared<BoxFuture<'static, InitResult>>;

pub type EngineFactory = Arc<dyn Fn() -> BoxFuture<'static, InitResult> + Send + Sync>;

/// Lazily initialized shared engine handle. The first caller starts the
/// factory; every concurrent caller awaits the same in-flight future, so
/// initialization runs at most once and its outcome fans out to all waiters.
/// A failed attempt clears the slot and the next call retries.
pub struct EngineLifecycle {
    pending: Mutex<Option<InitFuture>>,
    factory: EngineFactory,
}

impl EngineLifecycle {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            pending: Mutex::new(None),
            factory,
        }
    }

    /// Lifecycle for the built-in arena engine.
    pub fn native(config: LoaderConfig) -> Self {
        Self::new(Arc::new(move || {
            let config = config.clone();
            async move {
                let engine = NativeSplatEngine::load(&config).await?;
                Ok(Arc::new(engine) as Arc<dyn DecodeEngine>)
            }
            .boxed()
        }))
    }

    /// Yield the engine handle, initializing it on first use.
    pub async fn get(&self) -> InitResult {
        let fut = {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some(fut) => fut.clone(),
                None => {
                    debug!("starting engine initialization");
                    let fut = (self.factory)().shared();
                    *pending = Some(fut.clone());
                    fut
                }
            }
        };

        let result = fut.clone().await;
        if let Err(e) = &result {
            warn!("engine initialization failed: {e}");
            // Clear the slot for retry, but only if it still holds this
            // attempt; a newer in-flight attempt must not be clobbered.
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|cur| cur.ptr_eq(&fut)) {
                *pending = None;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counting_lifecycle(
        attempts: Arc<AtomicU32>,
        fail_first: bool,
    ) -> EngineLifecycle {
        EngineLifecycle::new(Arc::new(move || {
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                if fail_first && attempt == 1 {
                    Err(InitializationError("injected".into()))
                } else {
                    let engine = NativeSplatEngine::new(1 << 16);
                    Ok(Arc::new(engine) as Arc<dyn DecodeEngine>)
                }
            }
            .boxed()
        }))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_initialization() {
        let attempts = Arc::new(AtomicU32::new(0));
        let lifecycle = Arc::new(counting_lifecycle(attempts.clone(), false));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lifecycle = lifecycle.clone();
            tasks.push(tokio::spawn(async move { lifecycle.get().await }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_fans_out_and_next_call_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let lifecycle = Arc::new(counting_lifecycle(attempts.clone(), true));

        let a = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.get().await })
        };
        // Attach the second waiter while the first attempt is in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.get().await })
        };

        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // The slot was cleared; a later call retries and succeeds.
        assert!(lifecycle.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
