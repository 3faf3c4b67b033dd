//! Query routing and code generation.
//!
//! [`QueryRouter::route`] walks one query through a small state machine:
//!
//! ```text
//! query ──conversational?──▶ Conversational
//!   │
//!   ▼ retrieve table profiles (tenant/source scoped)
//!   ├─ none ─────────────────▶ NoContext
//!   ▼ decide mode
//!   ├─ relationship doc AND (relation keyword OR >1 file) ─▶ RelationalQuery
//!   └─ otherwise ───────────────────────────────────────────▶ RegularQuery
//!   ▼ prompt model, parse response
//!   ├─ no code recovered ────▶ GenerationFailed
//!   └─ code recovered ───────▶ Generated
//! ```
//!
//! Routing never executes code. Failures while retrieving context are
//! logged and treated as "no context"; a chat provider failure during
//! generation is an infrastructure error and propagates.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::Result;
use crate::llm::{ChatModel, CompletionRequest};
use crate::models::{kind, MetadataFilter, RouteKind};
use crate::parse::ResponseParser;
use crate::profile::TableProfile;
use crate::prompt;
use crate::relationships::RelationshipSet;
use crate::retrieve::scope_filter;
use crate::store::VectorIndex;

pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant CSV data to answer your question.";
pub const GENERATION_FAILED_ANSWER: &str =
    "I'm sorry, I couldn't generate appropriate code for your query.";
pub const FRIENDLY_REPLY: &str =
    "Hello! I can help you explore and analyse the tables you've uploaded. Ask me a question about your data.";
const REGULAR_EXPLANATION: &str = "Analysis of the data.";
const RELATIONAL_EXPLANATION: &str = "Analysis of the relationship between datasets.";

static CONVERSATIONAL_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^hi\b",
        r"^hello\b",
        r"^hey\b",
        r"^greetings",
        r"^how are you",
        r"^what's up",
        r"^good (morning|afternoon|evening)",
        r"^thanks",
        r"^thank you",
        r"^who are you",
        r"^what can you do",
        r"^help me",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect()
});

static RELATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)relation|connect|join|link|between").unwrap());

/// Greeting, thanks or help request rather than a data question.
pub fn is_conversational(query: &str) -> bool {
    let q = query.trim();
    CONVERSATIONAL_RE.iter().any(|re| re.is_match(q))
}

pub fn mentions_relationship(query: &str) -> bool {
    RELATION_RE.is_match(query)
}

/// Relational when the tenant has a relationship document and either the
/// query asks about relations or the context spans several files.
pub fn decide_mode(query: &str, has_relationships: bool, distinct_files: usize) -> RouteKind {
    if has_relationships && (mentions_relationship(query) || distinct_files > 1) {
        RouteKind::RelationalQuery
    } else {
        RouteKind::RegularQuery
    }
}

/// Terminal state of one routed query.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Conversational {
        reply: String,
    },
    NoContext {
        answer: String,
    },
    GenerationFailed {
        mode: RouteKind,
        answer: String,
        sources: Vec<String>,
        error: String,
    },
    Generated {
        mode: RouteKind,
        sources: Vec<String>,
        profiles: Vec<TableProfile>,
        code_candidates: Vec<String>,
        explanation: String,
        analysis: Option<String>,
    },
}

impl RouteOutcome {
    pub fn kind(&self) -> RouteKind {
        match self {
            RouteOutcome::Conversational { .. } => RouteKind::Conversational,
            RouteOutcome::NoContext { .. } => RouteKind::NoContext,
            RouteOutcome::GenerationFailed { .. } => RouteKind::GenerationFailed,
            RouteOutcome::Generated { mode, .. } => *mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Table profiles fetched as context.
    pub profile_k: usize,
    pub query_temperature: f32,
    pub chat_temperature: f32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            profile_k: 3,
            query_temperature: 0.4,
            chat_temperature: 0.7,
        }
    }
}

pub struct QueryRouter {
    index: VectorIndex,
    chat: Arc<dyn ChatModel>,
    parser: ResponseParser,
    settings: RouterSettings,
}

impl QueryRouter {
    pub fn new(index: VectorIndex, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            index,
            chat,
            parser: ResponseParser::standard(),
            settings: RouterSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub async fn route(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Result<RouteOutcome> {
        if is_conversational(query) {
            return Ok(RouteOutcome::Conversational {
                reply: self.converse(query).await,
            });
        }

        let profiles = self.table_context(query, tenant_id, sources).await;
        if profiles.is_empty() {
            tracing::info!(tenant_id, "no table context for query");
            return Ok(RouteOutcome::NoContext {
                answer: NO_CONTEXT_ANSWER.to_string(),
            });
        }
        let filenames: Vec<String> = profiles.iter().map(|p| p.filename.clone()).collect();

        let relationships = self.relationship_text(tenant_id).await;
        let mode = decide_mode(query, relationships.is_some(), filenames.len());
        let table_info = prompt::format_table_info(&profiles);
        let prompt_text = match (&mode, &relationships) {
            (RouteKind::RelationalQuery, Some(text)) => {
                prompt::relational_query_prompt(&table_info, text, query)
            }
            _ => prompt::regular_query_prompt(&table_info, query),
        };
        tracing::debug!(tenant_id, mode = ?mode, tables = filenames.len(), "generating analysis code");

        let request = CompletionRequest::prompt(prompt_text, self.settings.query_temperature);
        let raw = self.chat.complete(&request).await?;

        match self.parser.parse(&raw) {
            Ok(parsed) => {
                let fallback = if mode == RouteKind::RelationalQuery {
                    RELATIONAL_EXPLANATION
                } else {
                    REGULAR_EXPLANATION
                };
                Ok(RouteOutcome::Generated {
                    mode,
                    sources: filenames,
                    profiles,
                    code_candidates: parsed.code_candidates,
                    explanation: parsed.explanation.unwrap_or_else(|| fallback.to_string()),
                    analysis: parsed.analysis,
                })
            }
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "model response had no usable code");
                Ok(RouteOutcome::GenerationFailed {
                    mode,
                    answer: GENERATION_FAILED_ANSWER.to_string(),
                    sources: filenames,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn converse(&self, query: &str) -> String {
        let request = CompletionRequest::prompt(
            prompt::conversational_prompt(query),
            self.settings.chat_temperature,
        );
        match self.chat.complete(&request).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => FRIENDLY_REPLY.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "conversational reply failed");
                FRIENDLY_REPLY.to_string()
            }
        }
    }

    /// Profiles of the most relevant tables, one per filename.
    pub async fn table_context(
        &self,
        query: &str,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Vec<TableProfile> {
        let filter = scope_filter(tenant_id, sources).with_kind(kind::TABLE_DESCRIPTION);
        let hits = match self
            .index
            .similarity_search(query, self.settings.profile_k, &filter)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "table profile retrieval failed");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        hits.into_iter()
            .filter_map(|h| TableProfile::from_metadata(&h.chunk.metadata))
            .filter(|p| seen.insert(p.filename.clone()))
            .collect()
    }

    /// Text of the tenant's relationship document, if one exists.
    pub async fn relationship_text(&self, tenant_id: &str) -> Option<String> {
        let filter = MetadataFilter::tenant(tenant_id).with_kind(kind::TABLE_RELATIONSHIPS);
        match self.index.store().get(&filter).await {
            Ok(docs) => docs.into_iter().next().map(|d| d.text),
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "relationship lookup failed");
                None
            }
        }
    }

    /// Parsed relationship set of the tenant, if one exists.
    pub async fn relationships(&self, tenant_id: &str) -> Result<Option<RelationshipSet>> {
        let filter = MetadataFilter::tenant(tenant_id).with_kind(kind::TABLE_RELATIONSHIPS);
        Ok(self
            .index
            .store()
            .get(&filter)
            .await?
            .into_iter()
            .next()
            .and_then(|d| RelationshipSet::from_metadata(&d.metadata)))
    }
}
