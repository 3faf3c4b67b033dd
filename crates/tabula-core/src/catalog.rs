//! Where tables and executors come from.
//!
//! The query path needs the tenant's tables in memory and something that
//! can run generated snippets against them. Both are traits so the core
//! stays free of file I/O and interpreter dependencies.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::outcome::ExecutionOutcome;
use crate::table::Table;

/// Provides a tenant's tables keyed by filename.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Tables of `tenant_id`, restricted to `sources` when given. When two
    /// sources hold the same filename the first one found wins.
    async fn tables_for(
        &self,
        tenant_id: &str,
        sources: Option<&BTreeSet<String>>,
    ) -> Result<BTreeMap<String, Table>>;
}

/// Runs analysis snippets against in-memory tables.
pub trait CodeExecutor: Send + Sync {
    /// Run one snippet. Never fails: every problem becomes
    /// [`ExecutionOutcome::Failure`].
    fn execute(&self, code: &str, tables: &BTreeMap<String, Table>) -> ExecutionOutcome;

    /// Run each snippet independently, one outcome per snippet, in order.
    fn execute_many(&self, snippets: &[String], tables: &BTreeMap<String, Table>) -> Vec<ExecutionOutcome> {
        snippets.iter().map(|code| self.execute(code, tables)).collect()
    }
}

/// Fixed tables shared by every tenant. Useful for tests and one-off runs.
#[derive(Debug, Clone, Default)]
pub struct StaticTables {
    tables: BTreeMap<String, Table>,
}

impl StaticTables {
    pub fn new(tables: BTreeMap<String, Table>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl TableSource for StaticTables {
    async fn tables_for(
        &self,
        _tenant_id: &str,
        _sources: Option<&BTreeSet<String>>,
    ) -> Result<BTreeMap<String, Table>> {
        Ok(self.tables.clone())
    }
}
