//! Asynchronous gaussian-splat asset loading: fetch raw bytes, decode them
//! through the native engine, and move the decoded arrays to the consumer
//! without copying.

use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod client;
pub mod cloud;
pub mod config;
pub mod engine;
pub mod error;
pub mod source;
pub mod transfer;
pub mod worker;

pub use client::SplatLoader;
pub use cloud::{GaussianCloud, Splat};
pub use config::LoaderConfig;
pub use error::{EngineError, FetchError, InitializationError, LoadError};
pub use transfer::{SceneMeta, TransferEnvelope};
pub use worker::{LoadCommand, LoadEvent, LoadPhase, LoadWorker};

static INIT_TRACING: Once = Once::new();

/// Install the default tracing subscriber. Safe to call more than once; a
/// subscriber installed by the host wins.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("splat loader tracing initialized");
    });
}
