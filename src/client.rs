// Client handle — issues load commands and awaits their envelopes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{LoaderConfig, LOAD_DEADLINE_SECONDS};
use crate::error::LoadError;
use crate::transfer::TransferEnvelope;
use crate::worker::{LoadCommand, LoadEvent, LoadWorker};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<TransferEnvelope, LoadError>>>>>;

/// Owns a running worker and routes its events back to per-request waiters.
/// One load per URL may be in flight at a time; an envelope is delivered to
/// exactly one waiter.
pub struct SplatLoader {
    worker: LoadWorker,
    pending: PendingMap,
}

impl SplatLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let (worker, mut events) = LoadWorker::with_config(config);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let router_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let (url, result) = match event {
                    LoadEvent::Loaded { url, envelope } => (url, Ok(envelope)),
                    LoadEvent::Failed { url, error, .. } => (url, Err(error)),
                };
                match router_pending.lock().remove(&url) {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!("no waiter for {url}, dropping event"),
                }
            }
            debug!("event router stopped");
        });

        Self { worker, pending }
    }

    /// Load `url` and wait for its envelope, up to the load deadline. The
    /// deadline bounds waiting for the worker's answer; the fetch itself
    /// carries no timeout.
    pub async fn load(&self, url: &str) -> Result<TransferEnvelope, LoadError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(url) {
                return Err(LoadError::InFlight {
                    url: url.to_string(),
                });
            }
            pending.insert(url.to_string(), tx);
        }

        let sent = self
            .worker
            .send(LoadCommand::Load {
                url: url.to_string(),
            })
            .await;
        if !sent {
            self.pending.lock().remove(url);
            return Err(LoadError::WorkerGone);
        }

        match tokio::time::timeout(Duration::from_secs(LOAD_DEADLINE_SECONDS), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LoadError::WorkerGone),
            Err(_) => {
                self.pending.lock().remove(url);
                Err(LoadError::Deadline {
                    url: url.to_string(),
                    seconds: LOAD_DEADLINE_SECONDS,
                })
            }
        }
    }

    /// Stop the underlying worker.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}
