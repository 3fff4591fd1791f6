//! ChromaDB client over the v1 REST API.
//!
//! Collection ids are resolved by name once and memoized on the client;
//! a 404 on query evicts the memoized id so a recreated collection is
//! picked up on the next request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{CollectionStore, StoreError, StoredHit};
use crate::config::ChromaConfig;
use crate::models::Metadata;

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    ids: RwLock<HashMap<String, String>>,
}

impl ChromaStore {
    pub fn new(client: reqwest::Client, config: &ChromaConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            ids: RwLock::new(HashMap::new()),
        }
    }

    /// `<base_url>/api/v1/<segments...>`, each segment percent-encoded so a
    /// name containing `/`, `?` or spaces stays one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, StoreError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn collection_id(&self, name: &str) -> Result<String, StoreError> {
        if let Some(id) = self.ids.read().get(name) {
            return Ok(id.clone());
        }

        let url = self.endpoint(&["collections", name])?;
        let resp = self.client.get(url).timeout(self.timeout).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            // Older servers answer a missing collection with a 500 + ValueError
            if status == 404 || body.contains("does not exist") {
                return Err(StoreError::MissingCollection(name.to_string()));
            }
            return Err(StoreError::Status { status, body });
        }

        let info: CollectionInfo = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("collection info: {e}")))?;

        self.ids.write().insert(name.to_string(), info.id.clone());
        Ok(info.id)
    }
}

#[async_trait]
impl CollectionStore for ChromaStore {
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<StoredHit>, StoreError> {
        let id = self.collection_id(collection).await?;
        let url = self.endpoint(&["collections", id.as_str(), "query"])?;

        let req = QueryBody {
            query_embeddings: vec![embedding.to_vec()],
            n_results,
            include: ["documents", "metadatas", "distances"],
        };

        let resp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            if status == 404 {
                self.ids.write().remove(collection);
                return Err(StoreError::MissingCollection(collection.to_string()));
            }
            return Err(StoreError::Status { status, body });
        }

        let body: QueryResponseBody = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("query response: {e}")))?;

        Ok(decode_hits(body))
    }
}

/// Flatten Chroma's one-list-per-query-text layout. Exactly one query text is
/// sent, so only index 0 is read. Hits without a distance cannot be ranked and
/// are dropped.
fn decode_hits(body: QueryResponseBody) -> Vec<StoredHit> {
    let ids = first(body.ids);
    let mut documents = first(body.documents.unwrap_or_default()).into_iter();
    let mut metadatas = first(body.metadatas.unwrap_or_default()).into_iter();
    let mut distances = first(body.distances.unwrap_or_default()).into_iter();

    let mut hits = Vec::with_capacity(ids.len());
    for id in ids {
        let document = documents.next().flatten().unwrap_or_default();
        let metadata = metadatas.next().flatten().unwrap_or_default();
        let Some(distance) = distances.next().flatten() else {
            tracing::debug!("Dropping hit {id} without distance");
            continue;
        };
        hits.push(StoredHit {
            id,
            document,
            metadata,
            distance,
        });
    }
    hits
}

fn first<T>(nested: Vec<Vec<T>>) -> Vec<T> {
    nested.into_iter().next().unwrap_or_default()
}

// ─── Request/Response types ────────────────────────────

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Serialize)]
struct QueryBody {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Deserialize)]
struct QueryResponseBody {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}
