use std::path::PathBuf;

use serde::Deserialize;

/// Maximum bytes accepted for a fetched asset body (256 MB).
pub const MAX_ASSET_BYTES: u64 = 256 * 1024 * 1024;

/// Default capacity of the decode engine arena (512 MB).
pub const DEFAULT_ARENA_CAPACITY: usize = 512 * 1024 * 1024;

/// Seconds a client waits for the worker to answer a load command.
pub const LOAD_DEADLINE_SECONDS: u64 = 33;

/// Depth of the worker command and event queues.
pub const QUEUE_DEPTH: usize = 16;

/// Top-level configuration for the load engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Capacity in bytes of the decode engine arena.
    pub arena_capacity: usize,
    /// Maximum size in bytes accepted for a fetched asset.
    pub max_asset_bytes: u64,
    /// Directory whose files are treated as staged transient payloads and
    /// removed after the read.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            max_asset_bytes: MAX_ASSET_BYTES,
            scratch_dir: None,
        }
    }
}
