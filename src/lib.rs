//! # Tabula
//!
//! Retrieval-augmented question answering over a tenant's documents and
//! CSV tables.
//!
//! Tables are profiled, described and embedded on ingestion, and joinable
//! columns across a tenant's tables are detected. A question is routed to
//! a conversational reply or to analysis-code generation; generated Lua
//! snippets run in a sandbox against the tenant's tables.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ CSV / text  │──▶│ Profile + Chunk  │──▶│  SQLite   │
//! │  ingestion  │   │  Embed + Relate  │   │ vectors   │
//! └─────────────┘   └──────────────────┘   └────┬─────┘
//!                                               │
//!        ┌─────────────┐   ┌──────────┐   ┌─────▼─────┐
//!        │ Lua sandbox │◀──│  Router  │◀──│ Retriever │
//!        └─────────────┘   └──────────┘   └───────────┘
//!                 ▲               ▲
//!            ┌────┴────┐     ┌────┴─────┐
//!            │   CLI   │     │   HTTP   │
//!            └─────────┘     └──────────┘
//! ```
//!
//! Pure logic lives in `tabula_core`; this crate supplies persistence,
//! providers, the sandbox and the surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | SQLite `VectorStore` |
//! | [`embedding`] / [`rerank`] / [`llm`] | Provider implementations |
//! | [`sandbox`] | Lua execution of analysis snippets |
//! | [`tables`] | Loads a tenant's tables from disk |
//! | [`ingest`] | Table and text ingestion |
//! | [`service`] | The operations the surfaces expose |
//! | [`stream`] | Streaming answer events |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command runners |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
mod frame;
mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
mod lua_runtime;
pub mod migrate;
pub mod rerank;
pub mod sandbox;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod stream;
pub mod tables;
