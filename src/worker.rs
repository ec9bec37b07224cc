// Load worker — receives load commands, runs pipelines, emits events.
//
// One pipeline per command identifier (the URL); duplicates for an
// in-flight URL are dropped. Pipelines for different URLs fetch and build
// envelopes concurrently, but decode invocations go through a single gate
// because the engine is not reentrant. A failed pipeline reports a Failed
// event and the listening loop keeps running.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{LoaderConfig, QUEUE_DEPTH};
use crate::engine::bridge::decode_cloud;
use crate::engine::lifecycle::EngineLifecycle;
use crate::error::LoadError;
use crate::source::traits::AssetSource;
use crate::source::UrlAssetSource;
use crate::transfer::TransferEnvelope;

/// Inbound command, mirroring the `{ "type": "load", "url": ... }` wire
/// shape of the message protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoadCommand {
    Load { url: String },
}

/// Pipeline phase a request was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Initializing,
    Fetching,
    Decoding,
    Transferring,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Fetching => "fetching",
            Self::Decoding => "decoding",
            Self::Transferring => "transferring",
        };
        f.write_str(name)
    }
}

/// Outbound event for one command.
#[derive(Debug)]
pub enum LoadEvent {
    Loaded {
        url: String,
        envelope: TransferEnvelope,
    },
    Failed {
        url: String,
        phase: LoadPhase,
        error: LoadError,
    },
}

impl LoadEvent {
    pub fn url(&self) -> &str {
        match self {
            Self::Loaded { url, .. } | Self::Failed { url, .. } => url,
        }
    }
}

pub struct LoadWorker {
    commands: mpsc::Sender<LoadCommand>,
    shutdown: CancellationToken,
}

impl LoadWorker {
    /// Spawn the dispatcher task. Returns the worker handle and the event
    /// stream.
    pub fn spawn(
        lifecycle: Arc<EngineLifecycle>,
        source: Arc<dyn AssetSource>,
    ) -> (Self, mpsc::Receiver<LoadEvent>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<LoadCommand>(QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<LoadEvent>(QUEUE_DEPTH);
        let shutdown = CancellationToken::new();

        let state = Arc::new(WorkerState {
            lifecycle,
            source,
            decode_gate: AsyncMutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
            events: event_tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(async move {
            loop {
                let cmd = tokio::select! {
                    _ = state.shutdown.cancelled() => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => break,
                    },
                };
                match cmd {
                    LoadCommand::Load { url } => state.clone().dispatch(url),
                }
            }
            debug!("load worker stopped");
        });

        (
            Self {
                commands: cmd_tx,
                shutdown,
            },
            event_rx,
        )
    }

    /// Worker wired to the built-in engine and URL source for `config`.
    pub fn with_config(config: LoaderConfig) -> (Self, mpsc::Receiver<LoadEvent>) {
        let source = Arc::new(UrlAssetSource::new(&config));
        let lifecycle = Arc::new(EngineLifecycle::native(config));
        Self::spawn(lifecycle, source)
    }

    /// Submit a command. Returns `false` if the worker is gone.
    pub async fn send(&self, command: LoadCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Clone of the command channel for callers that queue directly.
    pub fn command_sender(&self) -> mpsc::Sender<LoadCommand> {
        self.commands.clone()
    }

    /// Stop the dispatcher. In-flight pipelines stop at their next await.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct WorkerState {
    lifecycle: Arc<EngineLifecycle>,
    source: Arc<dyn AssetSource>,
    decode_gate: AsyncMutex<()>,
    in_flight: Mutex<HashSet<String>>,
    events: mpsc::Sender<LoadEvent>,
    shutdown: CancellationToken,
}

impl WorkerState {
    /// Start one pipeline task for `url` unless one is already running.
    fn dispatch(self: Arc<Self>, url: String) {
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(url.clone()) {
                debug!("load for {url} already in flight, dropping duplicate");
                return;
            }
        }

        tokio::spawn(async move {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.in_flight.lock().remove(&url);
                    return;
                }
                event = self.run_load(&url) => event,
            };
            self.in_flight.lock().remove(&url);

            match &event {
                LoadEvent::Loaded { url, envelope } => {
                    info!(
                        "loaded {url}: {} points, {} payload bytes",
                        envelope.meta.num_points,
                        envelope.payload_bytes()
                    );
                }
                LoadEvent::Failed { url, phase, error } => {
                    error!("load of {url} failed while {phase}: {error}");
                }
            }
            if self.events.send(event).await.is_err() {
                debug!("event receiver dropped");
            }
        });
    }

    /// One pipeline: engine handle, fetch, decode, envelope.
    async fn run_load(&self, url: &str) -> LoadEvent {
        let failed = |phase: LoadPhase, error: LoadError| LoadEvent::Failed {
            url: url.to_string(),
            phase,
            error,
        };

        let engine = match self.lifecycle.get().await {
            Ok(engine) => engine,
            Err(e) => return failed(LoadPhase::Initializing, e.into()),
        };

        debug!("fetching {url}");
        let bytes = match self.source.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => return failed(LoadPhase::Fetching, e.into()),
        };
        debug!("fetched {} bytes from {url}", bytes.len());

        // One decode at a time; the engine is not reentrant.
        let cloud = {
            let _gate = self.decode_gate.lock().await;
            decode_cloud(engine.as_ref(), &bytes)
        };
        let cloud = match cloud {
            Ok(cloud) => cloud,
            Err(e) => return failed(LoadPhase::Decoding, e),
        };

        let envelope = TransferEnvelope::build(cloud);
        LoadEvent::Loaded {
            url: url.to_string(),
            envelope,
        }
    }
}
