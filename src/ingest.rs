//! Ingestion pipeline orchestration.
//!
//! Tables: load → profile → describe → embed → store, one table at a
//! time, followed by a tenant-wide relationship recompute. Text:
//! chunk → embed → store.
//!
//! Re-ingesting a `(tenant, source, filename)` that is already indexed is
//! a no-op reported as `skipped`, unless `force` is set, in which case the
//! old chunks are deleted before the new ones are stored. The sequence is
//! not transactional: a crash in between leaves the key missing, and
//! re-running the ingestion repairs it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use tabula_core::catalog::TableSource;
use tabula_core::chunk::{chunk_text, ChunkParams};
use tabula_core::error::{Error, Result};
use tabula_core::llm::ChatModel;
use tabula_core::models::{kind, ChunkMetadata, Document, MetadataFilter};
use tabula_core::profile::{describe, profile_table};
use tabula_core::relationships::{JoinCandidate, RelationshipDetector, RelationshipSet};
use tabula_core::store::VectorIndex;

use crate::tables::{load_csv, StoreTables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Indexed,
    Reindexed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableIngestResult {
    pub filename: String,
    pub filepath: String,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub tenant_id: String,
    pub source_id: String,
    pub tables: Vec<TableIngestResult>,
    pub relationships: Vec<JoinCandidate>,
}

impl IngestReport {
    pub fn count(&self, status: IngestStatus) -> usize {
        self.tables.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunking: ChunkParams,
    pub description_temperature: f32,
    pub max_distinct_values: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkParams::default(),
            description_temperature: 0.1,
            max_distinct_values: 10_000,
        }
    }
}

pub struct Ingestor {
    index: VectorIndex,
    chat: Arc<dyn ChatModel>,
    tables: StoreTables,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(index: VectorIndex, chat: Arc<dyn ChatModel>, settings: IngestSettings) -> Self {
        let tables = StoreTables::new(index.store().clone());
        Self {
            index,
            chat,
            tables,
            settings,
        }
    }

    /// Index each CSV file in `paths` under `(tenant_id, source_id)`, then
    /// recompute the tenant's relationships if anything changed.
    ///
    /// Problems with a single file (unreadable, unparsable) are reported
    /// in its status. Store and provider failures abort the batch.
    pub async fn ingest_tables(
        &self,
        paths: &[PathBuf],
        tenant_id: &str,
        source_id: &str,
        force: bool,
    ) -> Result<IngestReport> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = self.ingest_table(path, tenant_id, source_id, force).await?;
            tracing::info!(
                tenant_id,
                source_id,
                filename = %result.filename,
                status = ?result.status,
                chunks = result.chunks,
                "table ingested"
            );
            results.push(result);
        }

        let changed = results
            .iter()
            .any(|r| matches!(r.status, IngestStatus::Indexed | IngestStatus::Reindexed));
        let relationships = if changed {
            self.recompute_relationships(tenant_id).await?
        } else {
            self.stored_relationships(tenant_id).await?
        };

        Ok(IngestReport {
            tenant_id: tenant_id.to_string(),
            source_id: source_id.to_string(),
            tables: results,
            relationships: relationships.candidates(),
        })
    }

    async fn ingest_table(
        &self,
        path: &Path,
        tenant_id: &str,
        source_id: &str,
        force: bool,
    ) -> Result<TableIngestResult> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let filepath = std::path::absolute(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        let mut result = TableIngestResult {
            filename: filename.clone(),
            filepath: filepath.clone(),
            status: IngestStatus::Indexed,
            message: None,
            chunks: 0,
        };

        let key = MetadataFilter::tenant(tenant_id)
            .with_source(source_id)
            .with_filename(filename.clone());
        let existing = self
            .index
            .store()
            .count(&key.clone().with_kind(kind::TABLE_DESCRIPTION))
            .await?;
        if existing > 0 && !force {
            let conflict = Error::IngestionConflict(format!("{} in source {}", filename, source_id));
            tracing::debug!(tenant_id, error = %conflict, "skipping");
            result.status = IngestStatus::Skipped;
            result.message = Some(conflict.to_string());
            return Ok(result);
        }

        let table = match load_csv(path).await {
            Ok(t) => t,
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => {
                result.status = IngestStatus::Failed;
                result.message = Some(e.to_string());
                return Ok(result);
            }
        };

        let mut profile = profile_table(&table, &filename, &filepath, tenant_id, Some(source_id));
        profile.description =
            describe(self.chat.as_ref(), &profile, self.settings.description_temperature).await;
        let docs = profile.to_documents()?;

        if existing > 0 {
            let mut removed = 0;
            for table_kind in [kind::TABLE_DESCRIPTION, kind::TABLE_COLUMNS] {
                removed += self
                    .index
                    .store()
                    .delete_where(&key.clone().with_kind(table_kind))
                    .await?;
            }
            tracing::debug!(tenant_id, source_id, filename = %filename, removed, "replacing indexed table");
            result.status = IngestStatus::Reindexed;
        }
        result.chunks = self.index.add_documents(docs).await?.len();
        Ok(result)
    }

    /// Chunk `text` and store it as `text` chunks. Returns the chunk count.
    pub async fn ingest_text(
        &self,
        text: &str,
        tenant_id: &str,
        source_id: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<usize> {
        let chunks = chunk_text(text, &self.settings.chunking);
        if chunks.is_empty() {
            return Ok(0);
        }

        let docs: Vec<Document> = chunks
            .into_iter()
            .map(|c| {
                let mut meta = ChunkMetadata::for_tenant(tenant_id)
                    .with_source(source_id)
                    .with_kind(kind::TEXT)
                    .with_extra("hash", c.hash);
                meta.chunk_index = Some(c.index);
                for (k, v) in &extra {
                    match (k.as_str(), v.as_str()) {
                        ("filename", Some(name)) => meta.filename = Some(name.to_string()),
                        ("filepath", Some(path)) => meta.filepath = Some(path.to_string()),
                        _ => {
                            meta.extra.insert(k.clone(), v.clone());
                        }
                    }
                }
                Document::new(c.text, meta)
            })
            .collect();

        let count = self.index.add_documents(docs).await?.len();
        tracing::info!(tenant_id, source_id, chunks = count, "text ingested");
        Ok(count)
    }

    /// Delete every chunk of one source, then refresh relationships.
    pub async fn delete_source(&self, tenant_id: &str, source_id: &str) -> Result<usize> {
        let removed = self
            .index
            .store()
            .delete_where(&MetadataFilter::tenant(tenant_id).with_source(source_id))
            .await?;
        if removed > 0 {
            self.recompute_relationships(tenant_id).await?;
        }
        tracing::info!(tenant_id, source_id, removed, "source deleted");
        Ok(removed)
    }

    /// Rebuild the tenant's relationship document from every table it
    /// currently has. The old document is always removed; a new one is
    /// stored only when at least two tables yield at least one edge.
    pub async fn recompute_relationships(&self, tenant_id: &str) -> Result<RelationshipSet> {
        let tables = self.tables.tables_for(tenant_id, None).await?;
        let set = if tables.len() >= 2 {
            detect_blocking(tables, self.settings.max_distinct_values).await?
        } else {
            RelationshipSet::default()
        };

        let doc_filter = MetadataFilter::tenant(tenant_id).with_kind(kind::TABLE_RELATIONSHIPS);
        self.index.store().delete_where(&doc_filter).await?;
        if !set.is_empty() {
            self.index.add_documents(vec![set.to_document(tenant_id)?]).await?;
        }
        tracing::info!(tenant_id, edges = set.len(), "relationships recomputed");
        Ok(set)
    }

    async fn stored_relationships(&self, tenant_id: &str) -> Result<RelationshipSet> {
        let filter = MetadataFilter::tenant(tenant_id).with_kind(kind::TABLE_RELATIONSHIPS);
        Ok(self
            .index
            .store()
            .get(&filter)
            .await?
            .first()
            .and_then(|d| RelationshipSet::from_metadata(&d.metadata))
            .unwrap_or_default())
    }
}

async fn detect_blocking(
    tables: BTreeMap<String, tabula_core::table::Table>,
    max_distinct_values: usize,
) -> Result<RelationshipSet> {
    tokio::task::spawn_blocking(move || {
        RelationshipDetector::new(max_distinct_values).detect(&tables)
    })
    .await
    .map_err(|e| Error::Table(format!("relationship detection panicked: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::DisabledChat;
    use tabula_core::store::memory::InMemoryStore;

    const ORDERS: &str = "order_id,customer_id,amount\n1,10,5.0\n2,11,7.5\n3,10,12.0\n";
    const CUSTOMERS: &str = "customer_id,name\n10,Ada\n11,Grace\n";

    fn ingestor() -> Ingestor {
        let index = VectorIndex::new(Arc::new(InMemoryStore::new()), Arc::new(HashEmbedder::new(64)));
        Ingestor::new(index, Arc::new(DisabledChat), IngestSettings::default())
    }

    fn write_fixtures(dir: &Path) -> Vec<PathBuf> {
        let orders = dir.join("orders.csv");
        let customers = dir.join("customers.csv");
        std::fs::write(&orders, ORDERS).unwrap();
        std::fs::write(&customers, CUSTOMERS).unwrap();
        vec![orders, customers]
    }

    #[tokio::test]
    async fn test_ingest_tables_detects_relationship() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = write_fixtures(dir.path());
        let ingestor = ingestor();

        let report = ingestor.ingest_tables(&paths, "u1", "s1", false).await.unwrap();
        assert_eq!(report.count(IngestStatus::Indexed), 2);
        assert_eq!(report.relationships.len(), 1);
        let edge = &report.relationships[0];
        assert_eq!(edge.table_a, "customers.csv");
        assert_eq!(edge.table_b, "orders.csv");
        assert!(edge
            .column_pairs
            .contains(&("customer_id".to_string(), "customer_id".to_string())));

        let docs = ingestor
            .index
            .store()
            .count(&MetadataFilter::tenant("u1").with_kind(kind::TABLE_RELATIONSHIPS))
            .await
            .unwrap();
        assert_eq!(docs, 1);
    }

    #[tokio::test]
    async fn test_reingest_without_force_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = write_fixtures(dir.path());
        let ingestor = ingestor();
        ingestor.ingest_tables(&paths, "u1", "s1", false).await.unwrap();

        let key = MetadataFilter::tenant("u1").with_source("s1").with_filename("orders.csv");
        let before = ingestor.index.store().count(&key).await.unwrap();

        let report = ingestor.ingest_tables(&paths[..1], "u1", "s1", false).await.unwrap();
        assert_eq!(report.tables[0].status, IngestStatus::Skipped);
        assert!(report.tables[0].message.is_some());
        assert_eq!(report.relationships.len(), 1);
        assert_eq!(ingestor.index.store().count(&key).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_force_replaces_previous_chunks() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = write_fixtures(dir.path());
        let ingestor = ingestor();
        ingestor.ingest_tables(&paths, "u1", "s1", false).await.unwrap();

        let key = MetadataFilter::tenant("u1").with_source("s1").with_filename("orders.csv");
        let old_ids: Vec<String> = ingestor
            .index
            .store()
            .get(&key)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();

        let report = ingestor.ingest_tables(&paths[..1], "u1", "s1", true).await.unwrap();
        assert_eq!(report.tables[0].status, IngestStatus::Reindexed);

        let new = ingestor.index.store().get(&key).await.unwrap();
        assert_eq!(new.len(), old_ids.len());
        assert!(new.iter().all(|c| !old_ids.contains(&c.id)));
        let rel = MetadataFilter::tenant("u1").with_kind(kind::TABLE_RELATIONSHIPS);
        assert_eq!(ingestor.index.store().count(&rel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_text_with_same_filename_does_not_block_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = write_fixtures(dir.path());
        let ingestor = ingestor();
        let mut extra = serde_json::Map::new();
        extra.insert("filename".into(), "orders.csv".into());
        ingestor
            .ingest_text("Notes about the orders export.", "u1", "s1", extra)
            .await
            .unwrap();

        let text = MetadataFilter::tenant("u1")
            .with_source("s1")
            .with_kind(kind::TEXT)
            .with_filename("orders.csv");
        let profile = MetadataFilter::tenant("u1")
            .with_source("s1")
            .with_kind(kind::TABLE_DESCRIPTION)
            .with_filename("orders.csv");

        let report = ingestor.ingest_tables(&paths[..1], "u1", "s1", false).await.unwrap();
        assert_eq!(report.tables[0].status, IngestStatus::Indexed);
        assert_eq!(ingestor.index.store().count(&profile).await.unwrap(), 1);

        let report = ingestor.ingest_tables(&paths[..1], "u1", "s1", true).await.unwrap();
        assert_eq!(report.tables[0].status, IngestStatus::Reindexed);
        assert_eq!(ingestor.index.store().count(&profile).await.unwrap(), 1);
        assert_eq!(ingestor.index.store().count(&text).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_file_is_failed_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.csv");
        let ingestor = ingestor();

        let report = ingestor.ingest_tables(&[missing], "u1", "s1", false).await.unwrap();
        assert_eq!(report.tables[0].status, IngestStatus::Failed);
        assert!(report.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_delete_source_drops_relationships() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = write_fixtures(dir.path());
        let ingestor = ingestor();
        ingestor.ingest_tables(&paths[..1], "u1", "s1", false).await.unwrap();
        ingestor.ingest_tables(&paths[1..], "u1", "s2", false).await.unwrap();

        let rel = MetadataFilter::tenant("u1").with_kind(kind::TABLE_RELATIONSHIPS);
        assert_eq!(ingestor.index.store().count(&rel).await.unwrap(), 1);

        let removed = ingestor.delete_source("u1", "s2").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(ingestor.index.store().count(&rel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_text_chunks_and_tags() {
        let ingestor = ingestor();
        let mut extra = serde_json::Map::new();
        extra.insert("filename".into(), "notes.txt".into());
        extra.insert("url".into(), "https://example.com".into());

        let text = "Quarterly revenue grew. ".repeat(200);
        let n = ingestor.ingest_text(&text, "u1", "web", extra).await.unwrap();
        assert!(n > 1);

        let chunks = ingestor
            .index
            .store()
            .get(&MetadataFilter::tenant("u1").with_kind(kind::TEXT))
            .await
            .unwrap();
        assert_eq!(chunks.len(), n);
        assert_eq!(chunks[0].metadata.filename.as_deref(), Some("notes.txt"));
        assert_eq!(chunks[0].metadata.extra_str("url"), Some("https://example.com"));
        assert_eq!(ingestor.ingest_text("   ", "u1", "web", Default::default()).await.unwrap(), 0);
    }
}
