//! Vector store seam.
//!
//! The fusion engine only sees these traits, so tests run against in-memory
//! fakes and production runs against [`chroma::ChromaStore`].

pub mod chroma;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Metadata;

/// One nearest-neighbour hit from a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection '{0}' does not exist")]
    MissingCollection(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed store response: {0}")]
    Decode(String),

    #[error("invalid store URL: {0}")]
    InvalidUrl(String),
}

/// Read-only nearest-neighbour access to named collections.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Return up to `n_results` hits ordered by ascending distance.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<StoredHit>, StoreError>;
}

/// Maps query text to the embedding space the collections were built in.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}
