//! Deterministic providers shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::llm::{ChatModel, CompletionRequest};
use crate::rerank::Reranker;

/// Bag-of-words embedder: each lowercase token bumps one of 64 buckets.
pub struct KeywordEmbedder {
    dims: usize,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self { dims: 64 }
    }
}

impl KeywordEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut h: u64 = 0xcbf29ce484222325;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Scores 1.0 for candidates containing a preferred word, 0.0 otherwise.
pub struct ScriptedReranker {
    preferred: Option<String>,
    last_batch: AtomicUsize,
}

impl ScriptedReranker {
    pub fn preferring(word: &str) -> Self {
        Self {
            preferred: Some(word.to_string()),
            last_batch: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            preferred: None,
            last_batch: AtomicUsize::new(0),
        }
    }

    pub fn last_batch_size(&self) -> usize {
        self.last_batch.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for ScriptedReranker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        self.last_batch.store(candidates.len(), Ordering::SeqCst);
        let word = self
            .preferred
            .as_ref()
            .ok_or_else(|| Error::Provider("scorer offline".to_string()))?;
        Ok(candidates
            .iter()
            .map(|c| if c.contains(word.as_str()) { 1.0 } else { 0.0 })
            .collect())
    }
}

/// Chat model that replays queued responses and records every prompt.
#[derive(Default)]
pub struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedChat {
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted-chat"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider("no scripted response left".to_string()))
    }
}
