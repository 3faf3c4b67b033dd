//! Cross-encoder re-ranker over HTTP.
//!
//! Posts `{"query", "documents", "texts", "model"}` and accepts either of
//! the two common response shapes:
//! - `[{"index": i, "score": s}, ...]` (text-embeddings-inference `/rerank`)
//! - `{"results": [{"index": i, "relevance_score": s}, ...]}` (Cohere/Jina style)

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use tabula_core::error::{Error, Result};
use tabula_core::rerank::{PassthroughReranker, Reranker};

use crate::config::RerankerConfig;
use crate::http;

pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
    model: Option<String>,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reranker.url required for http provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        self.model.as_deref().unwrap_or("http")
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = serde_json::json!({
            "query": query,
            "documents": candidates,
            "texts": candidates,
        });
        if let Some(ref model) = self.model {
            body["model"] = serde_json::json!(model);
        }
        let json = http::post_json_with_retry(&self.client, &self.url, None, &body, 2, "reranker")
            .await?;
        parse_scores(&json, candidates.len())
    }
}

fn parse_scores(json: &serde_json::Value, expected: usize) -> Result<Vec<f32>> {
    let items = json
        .as_array()
        .or_else(|| json.get("results").and_then(|r| r.as_array()))
        .ok_or_else(|| Error::Provider("invalid reranker response".to_string()))?;

    let mut scores = vec![f32::NEG_INFINITY; expected];
    for item in items {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .ok_or_else(|| Error::Provider("reranker result without index".to_string()))?;
        let score = item
            .get("score")
            .or_else(|| item.get("relevance_score"))
            .and_then(|s| s.as_f64())
            .ok_or_else(|| Error::Provider("reranker result without score".to_string()))?;
        if index >= expected {
            return Err(Error::Provider(format!(
                "reranker index {} out of range for {} candidates",
                index, expected
            )));
        }
        scores[index] = score as f32;
    }
    if scores.iter().any(|s| *s == f32::NEG_INFINITY) {
        return Err(Error::Provider("reranker did not score every candidate".to_string()));
    }
    Ok(scores)
}

/// `none` → [`PassthroughReranker`], `http` → [`HttpReranker`].
pub fn create_reranker(config: &RerankerConfig) -> anyhow::Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "none" => Ok(Arc::new(PassthroughReranker)),
        "http" => Ok(Arc::new(HttpReranker::new(config)?)),
        other => bail!("Unknown reranker provider: {}", other),
    }
}
