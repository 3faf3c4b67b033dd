//! Two-stage retrieval: vector over-fetch, then cross-encoder re-ranking.
//!
//! The retriever operates entirely through [`VectorIndex`] and
//! [`Reranker`], with no knowledge of the backing store or model
//! endpoints.
//!
//! # Algorithm
//!
//! 1. Build a filter requiring the tenant and, when given, membership in
//!    the source set.
//! 2. Fetch `overfetch_factor × k` nearest chunks under that filter.
//! 3. Score every candidate against the query with the re-ranker.
//! 4. Sort by re-ranker score (desc), breaking ties by similarity rank
//!    (asc), and keep the first `k`.
//!
//! Any embedding, store or scorer failure surfaces as
//! [`Error::Retrieval`]; the caller decides whether to fall back to
//! [`Retriever::retrieve_unranked`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{MetadataFilter, StoredChunk};
use crate::rerank::Reranker;
use crate::store::VectorIndex;

/// One retrieved chunk with both stage scores.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk: StoredChunk,
    /// Cosine similarity from the first stage.
    pub similarity: f32,
    /// Position in the first-stage ordering, starting at 0.
    pub similarity_rank: usize,
    /// Re-ranker score; equals `similarity` for unranked results.
    pub score: f32,
}

pub struct Retriever {
    index: VectorIndex,
    reranker: Arc<dyn Reranker>,
    overfetch_factor: usize,
}

impl Retriever {
    pub fn new(index: VectorIndex, reranker: Arc<dyn Reranker>) -> Self {
        Self {
            index,
            reranker,
            overfetch_factor: 3,
        }
    }

    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Retrieve the top `k` chunks for `query` within a tenant and,
    /// optionally, a set of sources.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        tenant_id: &str,
        source_filter: Option<&BTreeSet<String>>,
    ) -> Result<Vec<RankedChunk>> {
        let filter = scope_filter(tenant_id, source_filter);
        self.retrieve_filtered(query, k, &filter).await
    }

    /// Like [`retrieve`](Self::retrieve) with an explicit filter.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RankedChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.first_stage(query, k * self.overfetch_factor, filter).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let scores = self
            .reranker
            .score(query, &texts)
            .await
            .map_err(|e| Error::Retrieval(format!("re-ranker {}: {}", self.reranker.name(), e)))?;
        if scores.len() != candidates.len() {
            return Err(Error::Retrieval(format!(
                "re-ranker {} returned {} scores for {} candidates",
                self.reranker.name(),
                scores.len(),
                candidates.len()
            )));
        }

        let mut ranked: Vec<RankedChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(c, score)| RankedChunk { score, ..c })
            .collect();
        sort_by_rerank_score(&mut ranked);
        ranked.truncate(k);

        tracing::debug!(
            tenant_id = %filter.tenant_id,
            returned = ranked.len(),
            "re-ranked retrieval"
        );
        Ok(ranked)
    }

    /// First stage only: top `k` by similarity, no re-ranking.
    pub async fn retrieve_unranked(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RankedChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.first_stage(query, k, filter).await
    }

    async fn first_stage(
        &self,
        query: &str,
        fetch: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RankedChunk>> {
        let hits = self
            .index
            .similarity_search(query, fetch, filter)
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| RankedChunk {
                chunk: hit.chunk,
                similarity: hit.score,
                similarity_rank: rank,
                score: hit.score,
            })
            .collect())
    }
}

/// The tenant + optional source-set filter used by every scoped lookup.
pub fn scope_filter(tenant_id: &str, source_filter: Option<&BTreeSet<String>>) -> MetadataFilter {
    let filter = MetadataFilter::tenant(tenant_id);
    match source_filter {
        Some(sources) => filter.with_sources(sources.iter().cloned()),
        None => filter,
    }
}

/// Order by re-ranker score descending, ties by first-stage rank.
pub fn sort_by_rerank_score(chunks: &mut [RankedChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.similarity_rank.cmp(&b.similarity_rank))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{kind, ChunkMetadata, Document};
    use crate::rerank::PassthroughReranker;
    use crate::store::memory::InMemoryStore;
    use crate::testing::{KeywordEmbedder, ScriptedReranker};

    async fn seeded_index(docs: &[(&str, &str, &str)]) -> VectorIndex {
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(KeywordEmbedder::default()),
        );
        let docs = docs
            .iter()
            .map(|(tenant, source, text)| {
                Document::new(
                    *text,
                    ChunkMetadata::for_tenant(*tenant)
                        .with_source(*source)
                        .with_kind(kind::TEXT),
                )
            })
            .collect();
        index.add_documents(docs).await.unwrap();
        index
    }

    fn ranked(rank: usize, score: f32) -> RankedChunk {
        RankedChunk {
            chunk: StoredChunk {
                id: format!("c{}", rank),
                text: String::new(),
                metadata: ChunkMetadata::for_tenant("u1"),
            },
            similarity: 1.0 - rank as f32 * 0.1,
            similarity_rank: rank,
            score,
        }
    }

    #[test]
    fn test_ties_broken_by_similarity_rank() {
        let mut chunks = vec![ranked(0, 0.5), ranked(1, 0.9), ranked(2, 0.5), ranked(3, 0.9)];
        sort_by_rerank_score(&mut chunks);
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c0", "c2"]);
    }

    #[tokio::test]
    async fn test_never_returns_other_tenant() {
        let index = seeded_index(&[
            ("u1", "s1", "sales revenue by region"),
            ("u2", "s1", "sales revenue by region"),
            ("u2", "s2", "sales revenue totals"),
        ])
        .await;
        let retriever = Retriever::new(index, Arc::new(PassthroughReranker));

        let results = retriever.retrieve("sales revenue", 5, "u1", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.chunk.metadata.tenant_id == "u1"));
    }

    #[tokio::test]
    async fn test_source_filter_applies() {
        let index = seeded_index(&[
            ("u1", "s1", "inventory levels"),
            ("u1", "s2", "inventory counts"),
        ])
        .await;
        let retriever = Retriever::new(index, Arc::new(PassthroughReranker));
        let sources: BTreeSet<String> = ["s2".to_string()].into_iter().collect();

        let results = retriever
            .retrieve("inventory", 5, "u1", Some(&sources))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.metadata.source_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_overfetches_then_reranks_to_k() {
        let index = seeded_index(&[
            ("u1", "s1", "apple pie recipe"),
            ("u1", "s1", "apple orchard history"),
            ("u1", "s1", "apple stock price"),
            ("u1", "s1", "apple cider vinegar"),
            ("u1", "s1", "apple tree pruning"),
            ("u1", "s1", "apple varieties list"),
        ])
        .await;
        let reranker = Arc::new(ScriptedReranker::preferring("cider"));
        let retriever = Retriever::new(index, reranker.clone());

        let results = retriever.retrieve("apple", 2, "u1", None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(reranker.last_batch_size(), 6);
        assert!(results[0].chunk.text.contains("cider"));
    }

    #[tokio::test]
    async fn test_scorer_failure_is_retrieval_error() {
        let index = seeded_index(&[("u1", "s1", "anything at all")]).await;
        let retriever = Retriever::new(index, Arc::new(ScriptedReranker::failing()));

        let err = retriever.retrieve("anything", 3, "u1", None).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_zero_k_is_empty() {
        let index = seeded_index(&[("u1", "s1", "text")]).await;
        let retriever = Retriever::new(index, Arc::new(PassthroughReranker));
        assert!(retriever.retrieve("text", 0, "u1", None).await.unwrap().is_empty());
    }
}
