//! Core data models for Tabula.
//!
//! These types flow through every stage: ingestion builds [`Document`]s,
//! the store persists them as [`EmbeddedChunk`]s, retrieval returns
//! [`StoredChunk`]s with scores, and the query path ends in a
//! [`QueryResult`].
//!
//! # Tenancy
//!
//! Every chunk carries exactly one `tenant_id` in its [`ChunkMetadata`].
//! Every read or delete goes through a [`MetadataFilter`], which cannot be
//! built without a tenant, so no operation can cross tenants by omission.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::outcome::ExecutionOutcome;

/// Values of the `type` metadata key.
pub mod kind {
    /// Plain text chunk from an uploaded document or scrape.
    pub const TEXT: &str = "text";
    /// Profile of one table: description, columns and sample rows.
    pub const TABLE_DESCRIPTION: &str = "table_description";
    /// Column listing of one table.
    pub const TABLE_COLUMNS: &str = "table_columns";
    /// The single relationship document of a tenant.
    pub const TABLE_RELATIONSHIPS: &str = "table_relationships";
}

/// Metadata attached to every stored chunk.
///
/// `tenant_id` is mandatory. Keys not modelled explicitly are kept in
/// `extra` and round-trip through the store unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkMetadata {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_file(mut self, filename: impl Into<String>, filepath: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self.filepath = Some(filepath.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// A piece of text waiting to be embedded and stored.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// The atomic unit of storage and retrieval.
///
/// Chunks are immutable once stored; an update is a delete followed by
/// a fresh insert.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl EmbeddedChunk {
    /// Drop the vector, keeping id, text and metadata.
    pub fn to_stored(&self) -> StoredChunk {
        StoredChunk {
            id: self.id.clone(),
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A chunk as returned by store reads: no vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk with its similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Predicate over chunk metadata.
///
/// The tenant is always required. Source membership, `type` tag and
/// filename narrow the match further when present.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub tenant_id: String,
    pub source_ids: Option<BTreeSet<String>>,
    pub kind: Option<String>,
    pub filename: Option<String>,
}

impl MetadataFilter {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_ids: None,
            kind: None,
            filename: None,
        }
    }

    /// Restrict to the given sources. An empty set means no restriction.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = sources.into_iter().map(Into::into).collect();
        self.source_ids = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn with_source(self, source_id: impl Into<String>) -> Self {
        self.with_sources([source_id.into()])
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if meta.tenant_id != self.tenant_id {
            return false;
        }
        if let Some(ref sources) = self.source_ids {
            match meta.source_id {
                Some(ref s) if sources.contains(s) => {}
                _ => return false,
            }
        }
        if let Some(ref kind) = self.kind {
            if meta.kind.as_deref() != Some(kind.as_str()) {
                return false;
            }
        }
        if let Some(ref filename) = self.filename {
            if meta.filename.as_deref() != Some(filename.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Terminal state reached by the query router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Conversational,
    NoContext,
    GenerationFailed,
    RegularQuery,
    RelationalQuery,
}

/// The structured answer returned for every submitted query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer_text: String,
    pub sources: Vec<String>,
    pub code_candidates: Vec<String>,
    pub execution_results: Vec<ExecutionOutcome>,
    pub route: RouteKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn answer_only(route: RouteKind, answer: impl Into<String>) -> Self {
        Self {
            answer_text: answer.into(),
            sources: Vec::new(),
            code_candidates: Vec::new(),
            execution_results: Vec::new(),
            route,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tenant: &str, source: Option<&str>, kind: Option<&str>) -> ChunkMetadata {
        let mut m = ChunkMetadata::for_tenant(tenant);
        m.source_id = source.map(String::from);
        m.kind = kind.map(String::from);
        m
    }

    #[test]
    fn test_filter_requires_tenant_match() {
        let f = MetadataFilter::tenant("u1");
        assert!(f.matches(&meta("u1", None, None)));
        assert!(!f.matches(&meta("u2", None, None)));
    }

    #[test]
    fn test_filter_source_membership() {
        let f = MetadataFilter::tenant("u1").with_sources(["s1", "s2"]);
        assert!(f.matches(&meta("u1", Some("s2"), None)));
        assert!(!f.matches(&meta("u1", Some("s3"), None)));
        assert!(!f.matches(&meta("u1", None, None)));
    }

    #[test]
    fn test_empty_source_set_is_unrestricted() {
        let f = MetadataFilter::tenant("u1").with_sources(Vec::<String>::new());
        assert!(f.source_ids.is_none());
        assert!(f.matches(&meta("u1", Some("anything"), None)));
    }

    #[test]
    fn test_filter_kind_and_filename() {
        let f = MetadataFilter::tenant("u1")
            .with_kind(kind::TABLE_DESCRIPTION)
            .with_filename("orders.csv");
        let mut m = meta("u1", Some("s1"), Some(kind::TABLE_DESCRIPTION));
        assert!(!f.matches(&m));
        m.filename = Some("orders.csv".into());
        assert!(f.matches(&m));
        m.kind = Some(kind::TABLE_COLUMNS.into());
        assert!(!f.matches(&m));
    }

    #[test]
    fn test_metadata_serializes_type_key_and_extras() {
        let m = ChunkMetadata::for_tenant("u1")
            .with_kind(kind::TEXT)
            .with_extra("content_hash", "abc");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["tenant_id"], "u1");
        assert_eq!(json["content_hash"], "abc");
        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
