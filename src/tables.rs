//! Loads a tenant's tables from the files their profiles point at.
//!
//! Every ingested table leaves a `table_description` chunk whose metadata
//! records `filename` and `filepath`. [`StoreTables`] lists those chunks
//! for the tenant (optionally narrowed to some sources) and parses each
//! file into a [`Table`]. Missing or unreadable files are logged and
//! skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tabula_core::catalog::TableSource;
use tabula_core::error::{Error, Result};
use tabula_core::models::kind;
use tabula_core::retrieve::scope_filter;
use tabula_core::store::VectorStore;
use tabula_core::table::Table;

/// Read a CSV file into a table off the async runtime.
pub async fn load_csv(path: &Path) -> Result<Table> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)
            .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        Table::from_csv_reader(file)
    })
    .await
    .map_err(|e| Error::Table(format!("CSV loader panicked: {}", e)))?
}

pub struct StoreTables {
    store: Arc<dyn VectorStore>,
}

impl StoreTables {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TableSource for StoreTables {
    async fn tables_for(
        &self,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Result<BTreeMap<String, Table>> {
        let filter = scope_filter(tenant_id, sources).with_kind(kind::TABLE_DESCRIPTION);
        let chunks = self.store.get(&filter).await?;

        let mut tables = BTreeMap::new();
        for chunk in chunks {
            let (Some(filename), Some(filepath)) =
                (chunk.metadata.filename, chunk.metadata.filepath)
            else {
                continue;
            };
            if tables.contains_key(&filename) {
                continue;
            }
            match load_csv(Path::new(&filepath)).await {
                Ok(table) => {
                    tables.insert(filename, table);
                }
                Err(e) => {
                    tracing::warn!(tenant_id, filename = %filename, error = %e, "could not load table");
                }
            }
        }
        Ok(tables)
    }
}
