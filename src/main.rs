//! # Tabula CLI (`tabula`)
//!
//! Index CSV tables and documents per tenant, ask questions over them and
//! serve the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! tabula --config ./config/tabula.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tabula init` | Create the SQLite database and run schema migrations |
//! | `tabula ingest-tables <tenant> <source> [paths] [--dir D]` | Profile and index CSV files |
//! | `tabula ingest-text <tenant> <source> <file>` | Chunk and index a text file |
//! | `tabula query <tenant> "<question>"` | Route, generate and run analysis code |
//! | `tabula ask <tenant> "<question>"` | Answer from indexed documents |
//! | `tabula contents <tenant>` | List stored chunks |
//! | `tabula purge <tenant>` | Delete a tenant's data (or one `--source`) |
//! | `tabula relationships <tenant>` | Show detected join candidates |
//! | `tabula serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! tabula init
//! tabula ingest-tables u1 sales --dir ./data
//! tabula query u1 "how many orders per customer"
//! tabula serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tabula::{commands, config, logging, migrate, server};

/// Tabula: retrieval-augmented question answering over documents and CSV
/// tables.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tabula.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "tabula", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tabula.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Profile CSV files, index them and refresh the tenant's relationships.
    IngestTables {
        tenant: String,
        source: String,
        /// CSV files to ingest.
        paths: Vec<PathBuf>,
        /// Also ingest every matching file under this directory.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Glob relative to `--dir` (repeatable). Defaults to `**/*.csv`.
        #[arg(long = "glob")]
        globs: Vec<String>,
        /// Replace tables that are already indexed.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },

    /// Chunk and index a text file (`-` reads stdin).
    IngestText {
        tenant: String,
        source: String,
        file: PathBuf,
    },

    /// Ask a question about the tenant's tables.
    Query {
        tenant: String,
        query: String,
        /// Restrict to these sources (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about the tenant's documents.
    Ask {
        tenant: String,
        query: String,
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,
    },

    /// List stored chunks.
    Contents {
        tenant: String,
        #[arg(long)]
        source: Option<String>,
        /// Chunk type: text, table_description, table_columns, table_relationships.
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Delete all of a tenant's data, or one source with `--source`.
    Purge {
        tenant: String,
        #[arg(long)]
        source: Option<String>,
    },

    /// Show the tenant's detected join candidates.
    Relationships {
        tenant: String,
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::IngestTables {
            tenant,
            source,
            paths,
            dir,
            globs,
            force,
            json,
        } => {
            commands::run_ingest_tables(
                &cfg,
                &tenant,
                &source,
                &paths,
                dir.as_deref(),
                &globs,
                force,
                json,
            )
            .await?;
        }
        Commands::IngestText {
            tenant,
            source,
            file,
        } => {
            commands::run_ingest_text(&cfg, &tenant, &source, &file).await?;
        }
        Commands::Query {
            tenant,
            query,
            sources,
            json,
        } => {
            commands::run_query(&cfg, &tenant, &query, sources, json).await?;
        }
        Commands::Ask {
            tenant,
            query,
            sources,
            stream,
        } => {
            commands::run_ask(&cfg, &tenant, &query, sources, stream).await?;
        }
        Commands::Contents {
            tenant,
            source,
            kind,
            filename,
            json,
        } => {
            commands::run_contents(&cfg, &tenant, source, kind, filename, json).await?;
        }
        Commands::Purge { tenant, source } => {
            commands::run_purge(&cfg, &tenant, source).await?;
        }
        Commands::Relationships { tenant, json } => {
            commands::run_relationships(&cfg, &tenant, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
