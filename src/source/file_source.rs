// Staged-file retrieval — transient local payloads handed over by URL.
//
// Callers stage a byte buffer as a file under the loader scratch directory
// and pass its file:// URL. The file is removed after the read, success or
// failure, so the staged resource never outlives the request that named it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use tracing::{debug, warn};

use super::traits::AssetSource;
use crate::error::FetchError;

pub struct StagedAssetSource {
    scratch_dir: Option<PathBuf>,
}

impl StagedAssetSource {
    pub fn new(scratch_dir: Option<PathBuf>) -> Self {
        Self { scratch_dir }
    }

    /// Only files inside the scratch directory are released; anything else
    /// is treated as a caller-owned path and left alone.
    fn is_transient(&self, path: &Path) -> bool {
        self.scratch_dir
            .as_deref()
            .is_some_and(|dir| path.starts_with(dir))
    }
}

#[async_trait]
impl AssetSource for StagedAssetSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::Scheme(url.to_string()))?;
        let path = parsed
            .to_file_path()
            .map_err(|_| FetchError::Scheme(url.to_string()))?;

        let result = tokio::fs::read(&path).await;

        if self.is_transient(&path) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("released staged file {}", path.display()),
                Err(e) if result.is_ok() => {
                    warn!("failed to release staged file {}: {}", path.display(), e);
                }
                Err(_) => {}
            }
        }

        match result {
            Ok(data) => {
                debug!("read {} bytes from {}", data.len(), path.display());
                Ok(Bytes::from(data))
            }
            Err(e) => Err(FetchError::Io {
                url: url.to_string(),
                source: e,
            }),
        }
    }
}
