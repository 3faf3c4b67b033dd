//! CLI command runners.
//!
//! Each `run_*` function builds the service from the config, performs one
//! operation and prints the result: human-readable by default, JSON with
//! `--json`.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use tabula_core::llm::ChatMessage;
use tabula_core::models::MetadataFilter;

use crate::config::Config;
use crate::ingest::IngestStatus;
use crate::service::Tabula;
use crate::stream::StreamEvent;

const PREVIEW_ROWS: usize = 10;

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn source_set(sources: Vec<String>) -> Option<BTreeSet<String>> {
    if sources.is_empty() {
        None
    } else {
        Some(sources.into_iter().collect())
    }
}

// ============ ingest-tables ============

/// Collect CSV files: explicit paths plus every file under `dir` matching
/// one of `globs` (default `**/*.csv`), sorted and de-duplicated. Globs
/// match paths relative to `dir` and `*` does not cross `/`.
pub fn discover_tables(paths: &[PathBuf], dir: Option<&Path>, globs: &[String]) -> Result<Vec<PathBuf>> {
    let mut found: BTreeSet<PathBuf> = paths.iter().cloned().collect();

    if let Some(root) = dir {
        if !root.is_dir() {
            bail!("Not a directory: {}", root.display());
        }
        let patterns = if globs.is_empty() {
            vec!["**/*.csv".to_string()]
        } else {
            globs.to_vec()
        };
        let include = build_globset(&patterns)?;
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if include.is_match(relative) {
                found.insert(entry.path().to_path_buf());
            }
        }
    }
    Ok(found.into_iter().collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    Ok(builder.build()?)
}

#[allow(clippy::too_many_arguments)]
pub async fn run_ingest_tables(
    config: &Config,
    tenant: &str,
    source: &str,
    paths: &[PathBuf],
    dir: Option<&Path>,
    globs: &[String],
    force: bool,
    json: bool,
) -> Result<()> {
    let files = discover_tables(paths, dir, globs)?;
    if files.is_empty() {
        bail!("No CSV files to ingest. Pass paths or --dir.");
    }

    let service = Tabula::from_config(config).await?;
    let report = service.ingest_tables(&files, tenant, source, force).await?;
    if json {
        return print_json(&report);
    }

    for t in &report.tables {
        let status = serde_json::to_value(t.status)?;
        let status = status.as_str().unwrap_or("unknown");
        match &t.message {
            Some(msg) => println!("{}: {} ({})", t.filename, status, msg),
            None => println!("{}: {} ({} chunks)", t.filename, status, t.chunks),
        }
    }
    for edge in &report.relationships {
        let pairs: Vec<String> = edge
            .column_pairs
            .iter()
            .map(|(a, b)| format!("{} = {}", a, b))
            .collect();
        println!("join: {} <-> {} on {}", edge.table_a, edge.table_b, pairs.join(", "));
    }
    println!(
        "Ingested {} table(s): {} indexed, {} reindexed, {} skipped, {} failed.",
        report.tables.len(),
        report.count(IngestStatus::Indexed),
        report.count(IngestStatus::Reindexed),
        report.count(IngestStatus::Skipped),
        report.count(IngestStatus::Failed)
    );
    Ok(())
}

// ============ ingest-text ============

/// Index a text file, or stdin when `file` is `-`.
pub async fn run_ingest_text(config: &Config, tenant: &str, source: &str, file: &Path) -> Result<()> {
    let mut extra = serde_json::Map::new();
    let text = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        if let Some(name) = file.file_name() {
            extra.insert("filename".into(), name.to_string_lossy().to_string().into());
        }
        extra.insert("filepath".into(), file.display().to_string().into());
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };

    let service = Tabula::from_config(config).await?;
    let count = service.ingest_text(&text, tenant, source, extra).await?;
    println!("Stored {} chunk(s) for {}/{}.", count, tenant, source);
    Ok(())
}

// ============ query ============

pub async fn run_query(
    config: &Config,
    tenant: &str,
    query: &str,
    sources: Vec<String>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let service = Tabula::from_config(config).await?;
    let sources = source_set(sources);
    let result = service.submit_query(query, tenant, sources.as_ref()).await?;
    if json {
        return print_json(&result);
    }

    println!("{}", result.answer_text);
    if !result.sources.is_empty() {
        println!("\nTables: {}", result.sources.join(", "));
    }
    for (i, (code, outcome)) in result
        .code_candidates
        .iter()
        .zip(&result.execution_results)
        .enumerate()
    {
        println!("\n--- candidate {} ---\n{}", i + 1, code.trim());
        println!("--- result ---\n{}", outcome.summary(PREVIEW_ROWS));
    }
    if let Some(err) = &result.error {
        println!("\nerror: {}", err);
    }
    Ok(())
}

// ============ ask ============

/// Answer from text chunks, printing tokens as they stream in.
pub async fn run_ask(
    config: &Config,
    tenant: &str,
    query: &str,
    sources: Vec<String>,
    stream: bool,
) -> Result<()> {
    let service = Tabula::from_config(config).await?;
    let sources = source_set(sources);
    let history: Vec<ChatMessage> = Vec::new();

    if !stream {
        let answer = service.answer(query, tenant, sources.as_ref(), &history).await?;
        println!("{}", answer.answer);
        return Ok(());
    }

    let mut rx = service
        .answer_stream(query, tenant, sources.as_ref(), &history)
        .await;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Token { text } => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            StreamEvent::Done { result_id } => {
                println!();
                tracing::debug!(result_id = %result_id, "stream complete");
                break;
            }
            StreamEvent::Error { message } => {
                println!();
                bail!("answer failed: {}", message);
            }
        }
    }
    Ok(())
}

// ============ contents / purge / relationships ============

pub async fn run_contents(
    config: &Config,
    tenant: &str,
    source: Option<String>,
    kind: Option<String>,
    filename: Option<String>,
    json: bool,
) -> Result<()> {
    let mut filter = MetadataFilter::tenant(tenant);
    if let Some(source) = source {
        filter = filter.with_source(source);
    }
    if let Some(kind) = kind {
        filter = filter.with_kind(&kind);
    }
    if let Some(filename) = filename {
        filter = filter.with_filename(filename);
    }

    let service = Tabula::from_config(config).await?;
    let chunks = service.fetch_contents(&filter).await?;
    if json {
        return print_json(&chunks);
    }
    if chunks.is_empty() {
        println!("No chunks.");
        return Ok(());
    }
    for c in &chunks {
        let first_line = c.text.lines().next().unwrap_or("");
        println!(
            "{}  {:<10} {:<20} {:<24} {}",
            c.id,
            c.metadata.source_id.as_deref().unwrap_or("-"),
            c.metadata.kind.as_deref().unwrap_or("-"),
            c.metadata.filename.as_deref().unwrap_or("-"),
            first_line
        );
    }
    println!("{} chunk(s).", chunks.len());
    Ok(())
}

pub async fn run_purge(config: &Config, tenant: &str, source: Option<String>) -> Result<()> {
    let service = Tabula::from_config(config).await?;
    let deleted = match source {
        Some(source) => service.delete_source(tenant, &source).await?,
        None => service.purge_tenant(tenant).await?,
    };
    println!("Deleted {} chunk(s).", deleted);
    Ok(())
}

pub async fn run_relationships(config: &Config, tenant: &str, json: bool) -> Result<()> {
    let service = Tabula::from_config(config).await?;
    let edges = service.relationships(tenant).await?;
    if json {
        return print_json(&edges);
    }
    if edges.is_empty() {
        println!("No relationships.");
        return Ok(());
    }
    for edge in &edges {
        let pairs: Vec<String> = edge
            .column_pairs
            .iter()
            .map(|(a, b)| format!("{} = {}", a, b))
            .collect();
        println!("{} <-> {} on {}", edge.table_a, edge.table_b, pairs.join(", "));
    }
    Ok(())
}
