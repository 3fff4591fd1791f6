use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::llm::embeddings::HttpEmbedder;
use crate::search::fusion::FusionEngine;
use crate::search::hybrid::HybridSearcher;
use crate::store::chroma::ChromaStore;
use crate::store::{CollectionStore, QueryEmbedder};

/// Shared application state. Built once at startup and cloned into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<FusionEngine>,
    pub hybrid: Arc<HybridSearcher>,
}

impl AppState {
    /// Wire the HTTP-backed store and embedder from configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.chroma.timeout_secs.max(1) * 3))
            .build()?;

        let store = Arc::new(ChromaStore::new(http_client.clone(), &config.chroma));
        let embedder = Arc::new(HttpEmbedder::new(http_client, config.embedding.clone()));
        Ok(Self::with_backends(config, store, embedder))
    }

    /// Build state around any store and embedder.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn CollectionStore>,
        embedder: Arc<dyn QueryEmbedder>,
    ) -> Self {
        let engine = Arc::new(FusionEngine::new(
            store,
            embedder,
            config.collections.clone(),
            &config.search,
        ));
        let hybrid = Arc::new(HybridSearcher::new(engine.clone(), &config.hybrid));
        Self {
            config,
            engine,
            hybrid,
        }
    }

    /// Clamp a requested result count to the configured bounds.
    pub fn result_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.search.default_results)
            .min(self.config.search.max_results)
    }
}
