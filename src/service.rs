//! The Tabula service: every operation the HTTP server and the CLI expose.
//!
//! [`Tabula`] owns one instance of each component, wired from the config
//! at startup: the SQLite-backed store, the embedding, re-ranking and
//! chat providers, the Lua sandbox and the table loader. Components get
//! their collaborators passed in; there is no global state.
//!
//! # Operations
//!
//! | Operation | Returns |
//! |-----------|---------|
//! | [`submit_query`](Tabula::submit_query) | [`QueryResult`] (route → generate → execute) |
//! | [`answer`](Tabula::answer) / [`answer_stream`](Tabula::answer_stream) | document Q&A |
//! | [`ingest_tables`](Tabula::ingest_tables) | per-table status + relationships |
//! | [`ingest_text`](Tabula::ingest_text) | chunk count |
//! | [`fetch_contents`](Tabula::fetch_contents) | raw chunk listing |
//! | [`purge_tenant`](Tabula::purge_tenant) / [`delete_source`](Tabula::delete_source) | deleted count |

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use tabula_core::catalog::{CodeExecutor, TableSource};
use tabula_core::embedding::EmbeddingProvider;
use tabula_core::error::{Error, Result};
use tabula_core::llm::{ChatMessage, ChatModel, CompletionRequest};
use tabula_core::models::{kind, MetadataFilter, QueryResult, StoredChunk};
use tabula_core::outcome::ExecutionOutcome;
use tabula_core::prompt::answer_prompt;
use tabula_core::relationships::JoinCandidate;
use tabula_core::rerank::Reranker;
use tabula_core::retrieve::{RankedChunk, Retriever};
use tabula_core::router::{QueryRouter, RouteOutcome, RouterSettings};
use tabula_core::store::{VectorIndex, VectorStore};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::{IngestReport, IngestSettings, Ingestor};
use crate::llm::create_chat_model;
use crate::rerank::create_reranker;
use crate::sandbox::LuaSandbox;
use crate::sqlite_store::SqliteStore;
use crate::stream::{ChannelSink, StreamEvent};
use crate::tables::StoreTables;

const ANSWER_PREFIX: &str = "ANSWER:";

/// Pluggable parts of the service. [`Tabula::from_config`] builds these
/// from the config; tests and embedders can supply their own.
pub struct Components {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub reranker: Arc<dyn Reranker>,
    pub chat: Arc<dyn ChatModel>,
    pub executor: Arc<dyn CodeExecutor>,
}

/// A document Q&A answer with the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub context: Vec<RankedChunk>,
}

pub struct Tabula {
    index: VectorIndex,
    retriever: Retriever,
    router: QueryRouter,
    chat: Arc<dyn ChatModel>,
    tables: Arc<dyn TableSource>,
    executor: Arc<dyn CodeExecutor>,
    ingestor: Ingestor,
    top_k: usize,
    chat_temperature: f32,
    stream_buffer: usize,
}

impl Tabula {
    /// Connect to the database, apply migrations and build every provider
    /// named in `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply(&pool).await?;

        let components = Components {
            store: Arc::new(SqliteStore::new(pool)),
            embedder: create_embedder(&config.embedding)?,
            reranker: create_reranker(&config.reranker)?,
            chat: create_chat_model(&config.llm)?,
            executor: Arc::new(LuaSandbox::new(&config.sandbox)),
        };
        tracing::info!(
            embedder = components.embedder.model_name(),
            reranker = components.reranker.name(),
            chat = components.chat.model_name(),
            "service ready"
        );
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: &Config, parts: Components) -> Self {
        let index = VectorIndex::new(parts.store.clone(), parts.embedder)
            .with_batch_size(config.embedding.batch_size);
        let retriever = Retriever::new(index.clone(), parts.reranker)
            .with_overfetch_factor(config.retrieval.overfetch_factor);
        let router = QueryRouter::new(index.clone(), parts.chat.clone()).with_settings(RouterSettings {
            profile_k: config.retrieval.profile_k,
            query_temperature: config.llm.query_temperature,
            chat_temperature: config.llm.chat_temperature,
        });
        let ingestor = Ingestor::new(
            index.clone(),
            parts.chat.clone(),
            IngestSettings {
                chunking: tabula_core::chunk::ChunkParams {
                    chunk_size: config.chunking.chunk_size,
                    chunk_overlap: config.chunking.chunk_overlap,
                },
                description_temperature: config.llm.description_temperature,
                max_distinct_values: config.relationships.max_distinct_values,
            },
        );

        Self {
            index,
            retriever,
            router,
            chat: parts.chat,
            tables: Arc::new(StoreTables::new(parts.store)),
            executor: parts.executor,
            ingestor,
            top_k: config.retrieval.top_k,
            chat_temperature: config.llm.chat_temperature,
            stream_buffer: config.server.stream_buffer.max(1),
        }
    }

    // ============ Tabular queries ============

    /// Route a question, generate analysis code and run every candidate
    /// against the tenant's tables.
    pub async fn submit_query(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Result<QueryResult> {
        let outcome = self.router.route(query, tenant_id, sources).await?;
        let route = outcome.kind();
        tracing::info!(tenant_id, route = ?route, "query routed");

        match outcome {
            RouteOutcome::Conversational { reply } => Ok(QueryResult::answer_only(route, reply)),
            RouteOutcome::NoContext { answer } => Ok(QueryResult::answer_only(route, answer)),
            RouteOutcome::GenerationFailed {
                answer,
                sources,
                error,
                ..
            } => Ok(QueryResult {
                sources,
                error: Some(error),
                ..QueryResult::answer_only(route, answer)
            }),
            RouteOutcome::Generated {
                sources: files,
                code_candidates,
                explanation,
                ..
            } => {
                let tables = self.tables.tables_for(tenant_id, sources).await?;
                let results = self.execute(code_candidates.clone(), tables).await?;
                let failed = results.iter().filter(|r| !r.is_success()).count();
                tracing::info!(
                    tenant_id,
                    candidates = results.len(),
                    failed,
                    "analysis code executed"
                );
                Ok(QueryResult {
                    answer_text: explanation,
                    sources: files,
                    code_candidates,
                    execution_results: results,
                    route,
                    error: None,
                })
            }
        }
    }

    async fn execute(
        &self,
        snippets: Vec<String>,
        tables: std::collections::BTreeMap<String, tabula_core::table::Table>,
    ) -> Result<Vec<ExecutionOutcome>> {
        let executor = self.executor.clone();
        tokio::task::spawn_blocking(move || executor.execute_many(&snippets, &tables))
            .await
            .map_err(|e| Error::Execution(format!("executor panicked: {}", e)))
    }

    // ============ Document Q&A ============

    /// Answer from the tenant's text chunks and the conversation history.
    pub async fn answer(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
        history: &[ChatMessage],
    ) -> Result<ChatAnswer> {
        let context = self.text_context(query, tenant_id, sources).await;
        let request = self.answer_request(query, &context, history);
        let raw = self.chat.complete(&request).await?;
        Ok(ChatAnswer {
            answer: strip_answer_prefix(&raw),
            context,
        })
    }

    /// Stream an answer as [`StreamEvent`]s. Context is gathered before
    /// this returns; generation runs on a spawned task.
    pub async fn answer_stream(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
        history: &[ChatMessage],
    ) -> mpsc::Receiver<StreamEvent> {
        let context = self.text_context(query, tenant_id, sources).await;
        let request = self.answer_request(query, &context, history);
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let chat = self.chat.clone();
        let tenant = tenant_id.to_string();

        tokio::spawn(async move {
            let sink = ChannelSink::new(tx.clone());
            let terminal = match chat.complete_streaming(&request, &sink).await {
                Ok(_) => StreamEvent::Done {
                    result_id: uuid::Uuid::new_v4().to_string(),
                },
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant, error = %e, "streamed answer failed");
                    StreamEvent::Error {
                        message: e.to_string(),
                    }
                }
            };
            if tx.send(terminal).await.is_err() {
                tracing::debug!(tenant_id = %tenant, "stream consumer went away");
            }
        });
        rx
    }

    /// Re-ranked text chunks, degrading to similarity order and then to
    /// no context at all.
    async fn text_context(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Vec<RankedChunk> {
        let filter =
            tabula_core::retrieve::scope_filter(tenant_id, sources).with_kind(kind::TEXT);
        match self.retriever.retrieve_filtered(query, self.top_k, &filter).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "re-ranked retrieval failed, using similarity order");
                match self.retriever.retrieve_unranked(query, self.top_k, &filter).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        tracing::warn!(tenant_id, error = %e, "retrieval failed, answering without context");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn answer_request(
        &self,
        query: &str,
        context: &[RankedChunk],
        history: &[ChatMessage],
    ) -> CompletionRequest {
        let texts: Vec<String> = context.iter().map(|c| c.chunk.text.clone()).collect();
        CompletionRequest::prompt(answer_prompt(query, &texts, history), self.chat_temperature)
    }

    // ============ Ingestion & management ============

    pub async fn ingest_tables(
        &self,
        paths: &[PathBuf],
        tenant_id: &str,
        source_id: &str,
        force: bool,
    ) -> Result<IngestReport> {
        self.ingestor.ingest_tables(paths, tenant_id, source_id, force).await
    }

    pub async fn ingest_text(
        &self,
        text: &str,
        tenant_id: &str,
        source_id: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<usize> {
        self.ingestor.ingest_text(text, tenant_id, source_id, extra).await
    }

    /// Raw chunks matching `filter`, ordered by source, filename and
    /// chunk index. An unknown tenant yields an empty listing.
    pub async fn fetch_contents(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>> {
        let mut chunks = self.index.store().get(filter).await?;
        chunks.sort_by(|a, b| {
            (&a.metadata.source_id, &a.metadata.filename, a.metadata.chunk_index).cmp(&(
                &b.metadata.source_id,
                &b.metadata.filename,
                b.metadata.chunk_index,
            ))
        });
        Ok(chunks)
    }

    /// Delete every chunk of the tenant. Returns the number deleted.
    pub async fn purge_tenant(&self, tenant_id: &str) -> Result<usize> {
        let removed = self
            .index
            .store()
            .delete_where(&MetadataFilter::tenant(tenant_id))
            .await?;
        tracing::info!(tenant_id, removed, "tenant purged");
        Ok(removed)
    }

    pub async fn delete_source(&self, tenant_id: &str, source_id: &str) -> Result<usize> {
        self.ingestor.delete_source(tenant_id, source_id).await
    }

    /// The tenant's detected join candidates; empty when none are stored.
    pub async fn relationships(&self, tenant_id: &str) -> Result<Vec<JoinCandidate>> {
        Ok(self
            .router
            .relationships(tenant_id)
            .await?
            .map(|set| set.candidates())
            .unwrap_or_default())
    }
}

/// Drop the `ANSWER:` lead-in the answer prompt asks for.
pub fn strip_answer_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(ANSWER_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_answer_prefix() {
        assert_eq!(strip_answer_prefix("ANSWER: 42 rows"), "42 rows");
        assert_eq!(strip_answer_prefix("  plain reply "), "plain reply");
        assert_eq!(strip_answer_prefix("ANSWER:"), "");
    }
}
