//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only path to chunk persistence. Every
//! read and delete takes a [`MetadataFilter`], which always carries a
//! tenant, so tenant isolation is enforced at this seam.
//!
//! [`VectorIndex`] wraps a store together with an [`EmbeddingProvider`]
//! and is what the ingestion and query paths use: it embeds text on the
//! way in and embeds queries on the way out.
//!
//! Implementations must be `Send + Sync` to be shared across request
//! handlers.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{Document, EmbeddedChunk, MetadataFilter, ScoredChunk, StoredChunk};

/// Abstract storage backend for embedded chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Insert chunks (ids must be fresh) |
/// | [`query`](VectorStore::query) | Top-k by cosine similarity under a filter |
/// | [`get`](VectorStore::get) | Every chunk matching a filter, no vectors |
/// | [`delete_ids`](VectorStore::delete_ids) | Remove chunks by id |
/// | [`delete_where`](VectorStore::delete_where) | Remove every chunk matching a filter |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Return up to `k` chunks matching `filter`, most similar first.
    /// Equal similarities keep insertion order.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>>;

    /// Return every chunk matching `filter` in insertion order.
    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>>;

    /// Delete chunks by id, returning how many existed.
    async fn delete_ids(&self, ids: &[String]) -> Result<usize>;

    /// Delete every chunk matching `filter`, returning the count.
    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        Ok(self.get(filter).await?.len())
    }
}

/// A vector store paired with the embedding provider that feeds it.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed and store documents, returning the new chunk ids.
    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(docs.len());
        for batch in docs.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Provider(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            let chunks: Vec<EmbeddedChunk> = batch
                .iter()
                .zip(vectors)
                .map(|(doc, vector)| EmbeddedChunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    vector,
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                })
                .collect();
            self.store.add(&chunks).await?;
            ids.extend(chunks.into_iter().map(|c| c.id));
        }
        Ok(ids)
    }

    /// Embed `query` and return the `k` nearest chunks under `filter`.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_one(query).await?;
        self.store.query(&vector, k, filter).await
    }
}
