//! # Tabula Core
//!
//! Pure logic for Tabula: data models, chunking, the vector store
//! abstraction, two-stage retrieval, the table model, profiling,
//! relationship detection, prompt building, response parsing and query
//! routing.
//!
//! This crate contains no tokio, sqlx, mlua, filesystem or network
//! dependencies. Providers (embeddings, re-ranking, chat), persistence
//! and code execution are traits implemented by the `tabula` crate.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunks, metadata, filters, query results |
//! | [`chunk`] | Overlapping text chunker |
//! | [`store`] | `VectorStore` trait, `VectorIndex`, in-memory store |
//! | [`retrieve`] | Over-fetch + re-rank retriever |
//! | [`table`] / [`ops`] | Typed tables, CSV loading, table operations |
//! | [`profile`] | Table profiles and their chunks |
//! | [`relationships`] | Join discovery between tables |
//! | [`router`] | Query classification and code generation |
//! | [`parse`] | Ordered response-parsing strategies |
//! | [`outcome`] | Execution outcomes and rendering |
//! | [`catalog`] | Table source and executor traits |

pub mod catalog;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod ops;
pub mod outcome;
pub mod parse;
pub mod profile;
pub mod prompt;
pub mod relationships;
pub mod rerank;
pub mod retrieve;
pub mod router;
pub mod store;
pub mod table;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
