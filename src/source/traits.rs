use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Retrieve the full byte body behind `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
