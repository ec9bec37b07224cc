// Error taxonomy for the load pipeline.

use thiserror::Error;

/// Network or filesystem retrieval failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("reading {url} failed: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported url: {0}")]
    Scheme(String),

    #[error("{url} is {size} bytes, over the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },
}

impl FetchError {
    /// HTTP status carried by the failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure reported by the decode engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine arena exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },

    #[error("unknown engine buffer handle {handle:#x}")]
    InvalidHandle { handle: u32 },

    #[error("malformed asset: {reason}")]
    Malformed { reason: String },
}

impl EngineError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Whether this failure is memory exhaustion rather than a decode problem.
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// The engine failed to come up. Cloneable so a single failed attempt can be
/// fanned out to every caller waiting on the shared initialization.
#[derive(Debug, Clone, Error)]
#[error("engine initialization failed: {0}")]
pub struct InitializationError(pub String);

/// Everything that can go wrong between a load command and its envelope.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("engine allocation failed: {0}")]
    Allocation(#[source] EngineError),

    #[error("decode failed: {0}")]
    Decode(#[source] EngineError),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error("a load for {url} is already in flight")]
    InFlight { url: String },

    #[error("load of {url} timed out after {seconds}s")]
    Deadline { url: String, seconds: u64 },

    #[error("load worker is gone")]
    WorkerGone,
}

impl LoadError {
    /// Classify an engine failure: exhaustion maps to `Allocation`, everything
    /// else to `Decode`.
    pub(crate) fn from_engine(err: EngineError) -> Self {
        if err.is_allocation() {
            Self::Allocation(err)
        } else {
            Self::Decode(err)
        }
    }
}
