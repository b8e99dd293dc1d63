//! Content retrieval — the fetch side of the estimation pipeline.

pub mod confluence;

pub use confluence::ConfluenceFetcher;

use async_trait::async_trait;

use crate::error::FetchError;

/// A fetched page or issue, normalized to markdown-ish text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: String,
    pub body_markdown: String,
}

/// Retrieves the source content for one estimation item.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}
