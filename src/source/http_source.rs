// HTTP asset retrieval over a shared reqwest client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use super::traits::AssetSource;
use crate::error::FetchError;

pub struct HttpAssetSource {
    client: Client,
    max_body_bytes: u64,
}

impl HttpAssetSource {
    pub fn new(max_body_bytes: u64) -> Self {
        Self {
            client: Client::new(),
            max_body_bytes,
        }
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!("GET {} failed with status {}", url, status.as_u16());
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Refuse oversized bodies up front when the server declares a length.
        if let Some(len) = resp.content_length() {
            if len > self.max_body_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    size: len,
                    limit: self.max_body_bytes,
                });
            }
        }

        let bytes = resp.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            source: e,
        })?;
        if bytes.len() as u64 > self.max_body_bytes {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size: bytes.len() as u64,
                limit: self.max_body_bytes,
            });
        }

        debug!("GET {}: {} bytes", url, bytes.len());
        Ok(bytes)
    }
}
