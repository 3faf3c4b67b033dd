//! SQLite-backed [`VectorStore`] implementation.
//!
//! Chunks live in a single `chunks` table. Scoping keys (`tenant_id`,
//! `source_id`, `kind`, `filename`) are real indexed columns so every
//! [`MetadataFilter`] becomes a `WHERE` clause; the full metadata is kept
//! as JSON alongside. Vectors are stored as little-endian f32 BLOBs and
//! compared in Rust with brute-force cosine similarity over the rows the
//! filter selects.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use tabula_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tabula_core::error::{Error, Result};
use tabula_core::models::{ChunkMetadata, EmbeddedChunk, MetadataFilter, ScoredChunk, StoredChunk};
use tabula_core::store::VectorStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Append `WHERE ...` for `filter` to a query under construction.
fn push_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a MetadataFilter) {
    qb.push(" WHERE tenant_id = ").push_bind(filter.tenant_id.as_str());
    if let Some(ref sources) = filter.source_ids {
        qb.push(" AND source_id IN (");
        let mut sep = qb.separated(", ");
        for s in sources {
            sep.push_bind(s.as_str());
        }
        sep.push_unseparated(")");
    }
    if let Some(ref kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(ref filename) = filter.filename {
        qb.push(" AND filename = ").push_bind(filename.as_str());
    }
}

fn parse_metadata(raw: &str) -> Result<ChunkMetadata> {
    serde_json::from_str(raw).map_err(|e| Error::Store(format!("corrupt chunk metadata: {}", e)))
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn add(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(Error::store)?;

        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, tenant_id, source_id, kind, filename, chunk_index,
                                    text, metadata_json, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.tenant_id)
            .bind(&chunk.metadata.source_id)
            .bind(&chunk.metadata.kind)
            .bind(&chunk.metadata.filename)
            .bind(chunk.metadata.chunk_index)
            .bind(&chunk.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&chunk.vector))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::store)?;
        }

        tx.commit().await.map_err(Error::store)?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new("SELECT id, text, metadata_json, embedding FROM chunks");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq ASC");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(Error::store)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            scored.push(ScoredChunk {
                chunk: StoredChunk {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: parse_metadata(&metadata_json)?,
                },
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
            });
        }
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<StoredChunk>> {
        let mut qb = QueryBuilder::new("SELECT id, text, metadata_json FROM chunks");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq ASC");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(Error::store)?;

        rows.iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                Ok(StoredChunk {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: parse_metadata(&metadata_json)?,
                })
            })
            .collect()
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM chunks WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.as_str());
        }
        sep.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await.map_err(Error::store)?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut qb = QueryBuilder::new("DELETE FROM chunks");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await.map_err(Error::store)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) AS n FROM chunks");
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await.map_err(Error::store)?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::models::kind;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::parse_config(&format!(
            "[db]\npath = \"{}\"\n",
            dir.path().join("t.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn chunk(id: &str, tenant: &str, source: &str, kind: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            id: id.to_string(),
            vector,
            text: format!("text {}", id),
            metadata: ChunkMetadata::for_tenant(tenant)
                .with_source(source)
                .with_kind(kind)
                .with_extra("note", "kept"),
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let (_dir, store) = store().await;
        store
            .add(&[
                chunk("a", "u1", "s1", kind::TEXT, vec![1.0, 0.0]),
                chunk("b", "u1", "s2", kind::TEXT, vec![0.7, 0.7]),
                chunk("c", "u2", "s1", kind::TEXT, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0], 5, &MetadataFilter::tenant("u1"))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].chunk.metadata.extra_str("note"), Some("kept"));

        let hits = store
            .query(&[1.0, 0.0], 5, &MetadataFilter::tenant("u1").with_source("s2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "b");
    }

    #[tokio::test]
    async fn test_delete_where_is_tenant_scoped() {
        let (_dir, store) = store().await;
        store
            .add(&[
                chunk("a", "u1", "s1", kind::TEXT, vec![1.0]),
                chunk("b", "u1", "s1", kind::TABLE_DESCRIPTION, vec![1.0]),
                chunk("c", "u2", "s1", kind::TEXT, vec![1.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .delete_where(&MetadataFilter::tenant("u1").with_kind(kind::TEXT))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(&MetadataFilter::tenant("u1")).await.unwrap(), 1);
        assert_eq!(store.count(&MetadataFilter::tenant("u2")).await.unwrap(), 1);

        assert_eq!(store.delete_where(&MetadataFilter::tenant("u1")).await.unwrap(), 1);
        assert_eq!(store.delete_ids(&["c".to_string(), "zz".to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_store_error() {
        let (_dir, store) = store().await;
        store.add(&[chunk("a", "u1", "s1", kind::TEXT, vec![1.0])]).await.unwrap();
        let err = store
            .add(&[chunk("a", "u1", "s1", kind::TEXT, vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
