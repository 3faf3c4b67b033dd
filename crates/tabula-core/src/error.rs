//! Error kinds shared by every Tabula component.
//!
//! Stage-level kinds ([`Error::Retrieval`], [`Error::Parse`],
//! [`Error::Execution`], [`Error::IngestionConflict`], [`Error::NotFound`])
//! are normally caught by the stage that raised them and folded into a
//! structured result. Infrastructure kinds ([`Error::Store`],
//! [`Error::Provider`]) propagate to the caller as hard failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Embedding, store or scorer failure while retrieving candidates.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// No strategy could recover code from a model response.
    #[error("could not parse model response: {0}")]
    Parse(String),

    /// A generated snippet failed to run.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The source is already indexed and no force flag was given.
    #[error("already indexed: {0}")]
    IngestionConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    /// Embedding, chat or re-ranking provider unreachable or misbehaving.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn store(e: impl std::fmt::Display) -> Self {
        Error::Store(e.to_string())
    }

    pub fn provider(e: impl std::fmt::Display) -> Self {
        Error::Provider(e.to_string())
    }

    pub fn table(e: impl std::fmt::Display) -> Self {
        Error::Table(e.to_string())
    }

    /// True for failures that should reach the caller rather than be
    /// folded into a result field.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Provider(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
