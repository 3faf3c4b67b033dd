//! In-memory [`VectorStore`] implementation for tests and embedded use.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`, in insertion order.
//! Similarity search is brute-force cosine over the chunks that pass the
//! filter.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{EmbeddedChunk, MetadataFilter, ScoredChunk, StoredChunk};

use super::VectorStore;

/// In-memory store for testing and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<EmbeddedChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total chunk count across all tenants.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<EmbeddedChunk>>> {
        self.chunks
            .read()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<EmbeddedChunk>>> {
        self.chunks
            .write()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut stored = self.write()?;
        let existing: HashSet<&str> = stored.iter().map(|c| c.id.as_str()).collect();
        if let Some(dup) = chunks.iter().find(|c| existing.contains(c.id.as_str())) {
            return Err(Error::Store(format!("duplicate chunk id: {}", dup.id)));
        }
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.read()?;
        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .filter(|c| filter.matches(&c.metadata))
            .map(|c| ScoredChunk {
                chunk: c.to_stored(),
                score: cosine_similarity(vector, &c.vector),
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>> {
        let stored = self.read()?;
        Ok(stored
            .iter()
            .filter(|c| filter.matches(&c.metadata))
            .map(EmbeddedChunk::to_stored)
            .collect())
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|c| !wanted.contains(c.id.as_str()));
        Ok(before - stored.len())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|c| !filter.matches(&c.metadata));
        Ok(before - stored.len())
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let stored = self.read()?;
        Ok(stored.iter().filter(|c| filter.matches(&c.metadata)).count())
    }
}
