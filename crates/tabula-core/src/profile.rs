//! Table profiling.
//!
//! A [`TableProfile`] summarises one uploaded table: its shape, a profile
//! per column, a couple of sample rows and a natural-language description.
//! Profiles are not stored separately. They are materialised as two
//! chunks (see [`TableProfile::to_documents`]) that carry the full profile
//! as JSON, so the router can rebuild them from search hits.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatModel, CompletionRequest};
use crate::models::{kind, ChunkMetadata, Document};
use crate::prompt;
use crate::table::{DType, Table};

/// Metadata key holding the serialized profile.
pub const PROFILE_KEY: &str = "profile";

const SAMPLE_VALUES: usize = 5;
const SAMPLE_ROWS: usize = 2;

/// Reserved words of Lua 5.4.
pub const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Globals the analysis sandbox defines or reads: the result slot, the
/// Lua base library and standard modules, and the host APIs.
const RESERVED_GLOBALS: &[&str] = &[
    "result", "assert", "collectgarbage", "error", "getmetatable", "ipairs", "next", "pairs",
    "pcall", "print", "rawequal", "rawget", "rawlen", "rawset", "select", "setmetatable",
    "tonumber", "tostring", "type", "xpcall", "warn", "coroutine", "math", "string", "table",
    "utf8", "os", "io", "debug", "package", "require", "load", "loadfile", "dofile", "json",
    "log", "read_csv", "dataframe", "__inputs", "__chunk_locals",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: DType,
    /// First few distinct non-null values, stringified.
    pub sample_values: Vec<String>,
    pub unique_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub filename: String,
    pub filepath: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub sample_rows_text: String,
    pub description: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// Profile `table` without a description.
pub fn profile_table(
    table: &Table,
    filename: &str,
    filepath: &str,
    tenant_id: &str,
    source_id: Option<&str>,
) -> TableProfile {
    let columns: Vec<ColumnProfile> = table
        .columns()
        .iter()
        .map(|c| {
            let numbers: Vec<f64> = if c.dtype.is_numeric() {
                c.non_null().filter_map(|v| v.as_f64()).collect()
            } else {
                Vec::new()
            };
            ColumnProfile {
                name: c.name.clone(),
                dtype: c.dtype,
                sample_values: c.distinct_keys(SAMPLE_VALUES),
                unique_count: c.distinct_keys(usize::MAX).len(),
                min: numbers.iter().cloned().reduce(f64::min),
                max: numbers.iter().cloned().reduce(f64::max),
            }
        })
        .collect();

    TableProfile {
        filename: filename.to_string(),
        filepath: filepath.to_string(),
        row_count: table.nrows(),
        column_count: columns.len(),
        columns,
        sample_rows_text: table.to_text(SAMPLE_ROWS),
        description: String::new(),
        tenant_id: tenant_id.to_string(),
        source_id: source_id.map(String::from),
    }
}

/// Stable identifier under which a table is bound in the sandbox.
///
/// The lowercase file stem with every non-alphanumeric character replaced
/// by `_`. Names that would not be valid identifiers are prefixed (leading
/// digit) or suffixed (keyword or sandbox global) with `_`.
pub fn variable_name_for(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    let mut name: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("table");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if LUA_KEYWORDS.contains(&name.as_str()) || RESERVED_GLOBALS.contains(&name.as_str()) {
        name.push('_');
    }
    name
}

impl TableProfile {
    pub fn variable_name(&self) -> String {
        variable_name_for(&self.filename)
    }

    /// `- name (dtype): [samples]` per column, with at most `samples`
    /// sample values each.
    pub fn columns_text(&self, samples: usize) -> String {
        self.columns
            .iter()
            .map(|c| {
                let shown: Vec<&str> = c.sample_values.iter().take(samples).map(String::as_str).collect();
                format!("- {} ({}): {:?}", c.name, c.dtype, shown)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Deterministic description used when no chat model is available.
    pub fn fallback_description(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let numeric: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.dtype.is_numeric())
            .map(|c| c.name.as_str())
            .collect();
        let mut text = format!(
            "Table {} with {} rows and {} columns: {}.",
            self.filename,
            self.row_count,
            self.column_count,
            names.join(", ")
        );
        if !numeric.is_empty() {
            text.push_str(&format!(" Numeric columns: {}.", numeric.join(", ")));
        }
        text
    }

    fn metadata(&self, kind: &str) -> ChunkMetadata {
        let mut meta = ChunkMetadata::for_tenant(self.tenant_id.clone())
            .with_kind(kind)
            .with_file(self.filename.clone(), self.filepath.clone());
        meta.source_id = self.source_id.clone();
        meta
    }

    /// The description chunk and the columns chunk for this profile.
    pub fn to_documents(&self) -> crate::error::Result<Vec<Document>> {
        let json = serde_json::to_string(self)?;

        let description = format!(
            "Table: {}\nDescription: {}\nRows: {}, Columns: {}\nColumns:\n{}\nSample Data:\n{}",
            self.filename,
            self.description,
            self.row_count,
            self.column_count,
            self.columns_text(3),
            self.sample_rows_text
        );
        let columns = format!(
            "Columns of {}:\n{}",
            self.filename,
            self.columns
                .iter()
                .map(|c| format!("- {} ({})", c.name, c.dtype))
                .collect::<Vec<_>>()
                .join("\n")
        );

        Ok(vec![
            Document::new(
                description,
                self.metadata(kind::TABLE_DESCRIPTION)
                    .with_extra(PROFILE_KEY, json.clone()),
            ),
            Document::new(
                columns,
                self.metadata(kind::TABLE_COLUMNS)
                    .with_extra(PROFILE_KEY, json),
            ),
        ])
    }

    /// Rebuild a profile from chunk metadata written by
    /// [`to_documents`](Self::to_documents).
    pub fn from_metadata(meta: &ChunkMetadata) -> Option<TableProfile> {
        serde_json::from_str(meta.extra_str(PROFILE_KEY)?).ok()
    }
}

/// Ask the chat model for a description, falling back to
/// [`TableProfile::fallback_description`] on any failure.
pub async fn describe(chat: &dyn ChatModel, profile: &TableProfile, temperature: f32) -> String {
    let request = CompletionRequest::prompt(prompt::description_prompt(profile), temperature);
    match chat.complete(&request).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => profile.fallback_description(),
        Err(e) => {
            tracing::warn!(filename = %profile.filename, error = %e, "description generation failed");
            profile.fallback_description()
        }
    }
}
