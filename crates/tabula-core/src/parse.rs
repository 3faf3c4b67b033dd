//! Recovering code from model responses.
//!
//! Models do not reliably follow output formats, so parsing is an ordered
//! list of [`ParseStrategy`]s tried in turn; the first one that yields at
//! least one code snippet wins.
//!
//! | Order | Strategy | Looks for |
//! |-------|----------|-----------|
//! | 1 | [`StructuredJson`] | a JSON object with `code`, `analysis`, `explanation` |
//! | 2 | [`MarkerBlocks`] | `<CODE_BLOCK>…</CODE_BLOCK>` sections |
//! | 3 | [`FencedBlocks`] | Markdown code fences |
//! | 4 | [`KeyValue`] | a `"code": "…"` pair in otherwise broken JSON |
//!
//! The regex strategies also look for an `explanation` field.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Code and commentary recovered from one response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedResponse {
    pub analysis: Option<String>,
    pub code_candidates: Vec<String>,
    pub explanation: Option<String>,
}

pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this strategy finds no code.
    fn parse(&self, raw: &str) -> Option<GeneratedResponse>;
}

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<CODE_BLOCK>(.*?)</CODE_BLOCK>").unwrap());

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\n?(.*?)```").unwrap());

static CODE_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"?(?:code|pandas_code)"?\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
});

static EXPLANATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)explanation["']?\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
});

/// Split a code field into candidates on `<CODE_BLOCK>` markers, or keep
/// it whole when it has none.
fn split_candidates(code: &str) -> Vec<String> {
    let blocks: Vec<String> = MARKER_RE
        .captures_iter(code)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if blocks.is_empty() && !code.trim().is_empty() {
        vec![code.trim().to_string()]
    } else {
        blocks
    }
}

/// Undo JSON string escapes in a regex-captured string body.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| {
        raw.replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    })
}

fn find_explanation(raw: &str) -> Option<String> {
    EXPLANATION_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()).trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Deserialize)]
struct JsonShape {
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default, alias = "pandas_code", alias = "lua_code")]
    code: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

pub struct StructuredJson;

impl StructuredJson {
    fn candidate_text(raw: &str) -> Option<&str> {
        let trimmed = raw.trim();
        if let Some(caps) = FENCE_RE.captures(trimmed) {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if lang.eq_ignore_ascii_case("json") {
                return caps.get(2).map(|m| m.as_str().trim());
            }
        }
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        (end > start).then(|| &trimmed[start..=end])
    }
}

impl ParseStrategy for StructuredJson {
    fn name(&self) -> &'static str {
        "structured_json"
    }

    fn parse(&self, raw: &str) -> Option<GeneratedResponse> {
        let shape: JsonShape = serde_json::from_str(Self::candidate_text(raw)?).ok()?;
        let candidates = split_candidates(shape.code.as_deref()?);
        if candidates.is_empty() {
            return None;
        }
        Some(GeneratedResponse {
            analysis: shape.analysis.filter(|s| !s.trim().is_empty()),
            code_candidates: candidates,
            explanation: shape.explanation.filter(|s| !s.trim().is_empty()),
        })
    }
}

pub struct MarkerBlocks;

impl ParseStrategy for MarkerBlocks {
    fn name(&self) -> &'static str {
        "marker_blocks"
    }

    fn parse(&self, raw: &str) -> Option<GeneratedResponse> {
        let blocks: Vec<String> = MARKER_RE
            .captures_iter(raw)
            .filter_map(|c| c.get(1))
            .map(|m| unescape_if_escaped(m.as_str()))
            .filter(|s| !s.is_empty())
            .collect();
        (!blocks.is_empty()).then(|| GeneratedResponse {
            analysis: None,
            code_candidates: blocks,
            explanation: find_explanation(raw),
        })
    }
}

/// Marker blocks cut out of a JSON string still carry `\n` escapes.
fn unescape_if_escaped(block: &str) -> String {
    let trimmed = block.trim();
    if !trimmed.contains('\n') && trimmed.contains("\\n") {
        unescape(trimmed).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct FencedBlocks;

impl ParseStrategy for FencedBlocks {
    fn name(&self) -> &'static str {
        "fenced_blocks"
    }

    fn parse(&self, raw: &str) -> Option<GeneratedResponse> {
        let blocks: Vec<String> = FENCE_RE
            .captures_iter(raw)
            .filter(|c| {
                !c.get(1)
                    .map(|m| m.as_str().eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
            })
            .filter_map(|c| c.get(2))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        (!blocks.is_empty()).then(|| GeneratedResponse {
            analysis: None,
            code_candidates: blocks,
            explanation: find_explanation(raw),
        })
    }
}

pub struct KeyValue;

impl ParseStrategy for KeyValue {
    fn name(&self) -> &'static str {
        "key_value"
    }

    fn parse(&self, raw: &str) -> Option<GeneratedResponse> {
        let code = CODE_KV_RE
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()))?;
        let candidates = split_candidates(&code);
        (!candidates.is_empty()).then(|| GeneratedResponse {
            analysis: None,
            code_candidates: candidates,
            explanation: find_explanation(raw),
        })
    }
}

/// Ordered strategy list.
pub struct ResponseParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl ResponseParser {
    pub fn new(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Structured JSON, then marker blocks, fences and key-value.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(StructuredJson),
            Box::new(MarkerBlocks),
            Box::new(FencedBlocks),
            Box::new(KeyValue),
        ])
    }

    pub fn parse(&self, raw: &str) -> Result<GeneratedResponse> {
        for strategy in &self.strategies {
            if let Some(parsed) = strategy.parse(raw) {
                tracing::debug!(
                    strategy = strategy.name(),
                    candidates = parsed.code_candidates.len(),
                    "parsed model response"
                );
                return Ok(parsed);
            }
        }
        Err(Error::Parse(format!(
            "no code found in response ({} chars, tried {})",
            raw.len(),
            self.strategies
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::standard()
    }
}
