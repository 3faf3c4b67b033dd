//! Cross-encoder re-ranking.
//!
//! A [`Reranker`] scores `(query, candidate)` pairs jointly, which is
//! slower than comparing precomputed vectors but much more precise. The
//! two-stage retriever only ever hands it a bounded candidate set.

use async_trait::async_trait;

use crate::error::Result;

/// Pairwise relevance scorer. Higher scores mean more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Score each candidate against `query`, returning one score per
    /// candidate in input order.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Scores every candidate equally, so the retriever's tie-break keeps
/// plain similarity order. Used when no cross-encoder is configured.
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; candidates.len()])
    }
}
