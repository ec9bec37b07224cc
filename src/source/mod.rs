// Asset retrieval — pluggable byte sources behind the `AssetSource` seam.

pub mod file_source;
pub mod http_source;
pub mod traits;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;

use crate::config::LoaderConfig;
use crate::error::FetchError;
use self::file_source::StagedAssetSource;
use self::http_source::HttpAssetSource;
use self::traits::AssetSource;

/// Scheme-dispatching source: http(s) goes to the network, file to a staged
/// local read. Everything else is rejected.
pub struct UrlAssetSource {
    http: HttpAssetSource,
    staged: StagedAssetSource,
}

impl UrlAssetSource {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            http: HttpAssetSource::new(config.max_asset_bytes),
            staged: StagedAssetSource::new(config.scratch_dir.clone()),
        }
    }
}

#[async_trait]
impl AssetSource for UrlAssetSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::Scheme(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => self.http.fetch(url).await,
            "file" => self.staged.fetch(url).await,
            _ => Err(FetchError::Scheme(url.to_string())),
        }
    }
}
