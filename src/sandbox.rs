//! Restricted execution of generated analysis snippets.
//!
//! Each snippet runs in a fresh Lua VM:
//!
//! 1. Static guards reject import statements, `require` calls and
//!    `open` calls with a non-read mode. Rejected code never runs.
//! 2. `read_csv("…/name.csv")` calls whose file stem matches a preloaded
//!    table are rewritten to reference that table in memory.
//! 3. The VM gets the host APIs from [`crate::lua_runtime`], a memory
//!    limit, an instruction-count hook enforcing the wall-clock timeout,
//!    and one global per input table named by
//!    [`variable_name_for`](tabula_core::profile::variable_name_for).
//! 4. The answer is `result` (global, or a chunk-level local); failing
//!    that, the earliest frame the snippet created and left in a global
//!    or chunk-level local; failing that, a success carrying [`NO_RESULT_MESSAGE`](tabula_core::outcome::NO_RESULT_MESSAGE).
//!
//! The guards are line-level pattern checks against the mistakes a
//! generator commonly makes. Removing `os`, `io`, `require` and friends
//! from the VM is what actually keeps snippets away from the host.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use mlua::prelude::*;
use regex::Regex;

use tabula_core::catalog::CodeExecutor;
use tabula_core::outcome::{ExecutionOutcome, ResultValue};
use tabula_core::profile::{variable_name_for, LUA_KEYWORDS};
use tabula_core::table::Table;

use crate::config::SandboxConfig;
use crate::frame::{next_seq, LuaFrame, LuaSeries};
use crate::lua_runtime::{lua_value_to_json, register_all_host_apis};

static IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(import\s+\S|from\s+\S+\s+import\b)").unwrap());

static REQUIRE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brequire\s*(\(|"|'|\[\[)"#).unwrap());

static OPEN_WITH_MODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bopen\s*\(\s*[^,()]*,\s*["']([^"']*)["']"#).unwrap());

static READ_CSV_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"read_csv\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap());

static LOCAL_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\blocal\s+([A-Za-z_][\w\s,<>]*)").unwrap());

/// Global holding the input frames, keyed by variable name.
const INPUTS_GLOBAL: &str = "__inputs";

/// Global the snippet trailer copies chunk-level locals into.
const CHUNK_LOCALS_GLOBAL: &str = "__chunk_locals";

/// Check a snippet against the static guards. Returns the rejection
/// message for the first offending line.
pub fn check_guards(code: &str) -> Result<(), String> {
    for (n, line) in code.lines().enumerate() {
        let line_no = n + 1;
        if IMPORT_LINE.is_match(line) || REQUIRE_CALL.is_match(line) {
            return Err(format!(
                "Imports are not allowed in analysis code (line {}: {})",
                line_no,
                line.trim()
            ));
        }
        for caps in OPEN_WITH_MODE.captures_iter(line) {
            let mode = &caps[1];
            if mode != "r" && mode != "rb" {
                return Err(format!(
                    "File write operations are not allowed in analysis code (line {}: mode '{}')",
                    line_no, mode
                ));
            }
        }
    }
    Ok(())
}

/// Replace `read_csv("path")` literals that name a preloaded table with a
/// reference to the in-memory frame.
pub fn rewrite_table_loads(code: &str, variables: &[String]) -> String {
    READ_CSV_LITERAL
        .replace_all(code, |caps: &regex::Captures| {
            let var = variable_name_for(&caps[1]);
            if variables.contains(&var) {
                tracing::debug!(path = &caps[1], variable = %var, "using preloaded table");
                format!("{}[\"{}\"]", INPUTS_GLOBAL, var)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[derive(Debug, Clone)]
pub struct LuaSandbox {
    timeout: Duration,
    memory_limit: usize,
    data_root: PathBuf,
}

impl LuaSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            memory_limit: config.memory_limit_mb * 1024 * 1024,
            data_root: config.data_root.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, code: &str, tables: &BTreeMap<String, Table>) -> LuaResult<Option<ResultValue>> {
        let lua = Lua::new();
        lua.set_memory_limit(self.memory_limit)?;

        let deadline = Instant::now() + self.timeout;
        let timeout = self.timeout;
        lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(10_000),
            move |_lua, _debug| {
                if Instant::now() > deadline {
                    Err(LuaError::RuntimeError(format!(
                        "snippet timed out after {} seconds",
                        timeout.as_secs_f64()
                    )))
                } else {
                    Ok(mlua::VmState::Continue)
                }
            },
        );

        register_all_host_apis(&lua, &self.data_root)?;

        let inputs = lua.create_table()?;
        let mut variables = Vec::with_capacity(tables.len());
        for (filename, table) in tables {
            let var = variable_name_for(filename);
            if variables.contains(&var) {
                tracing::warn!(filename = %filename, variable = %var, "variable name collision, keeping first table");
                continue;
            }
            let frame = lua.create_userdata(LuaFrame::new(table.clone()))?;
            inputs.set(var.as_str(), frame.clone())?;
            lua.globals().set(var.as_str(), frame)?;
            variables.push(var);
        }
        lua.globals().set(INPUTS_GLOBAL, inputs)?;

        let created_after = next_seq();
        let code = rewrite_table_loads(code, &variables);
        // A snippet ending in a top-level `return` cannot take the trailer.
        let chunk = match lua
            .load(format!("{}{}", code, locals_trailer(&code)))
            .set_name("snippet")
            .into_function()
        {
            Ok(chunk) => chunk,
            Err(_) => lua.load(&code).set_name("snippet").into_function()?,
        };
        chunk.call::<()>(())?;

        let locals = match lua.globals().get::<LuaValue>(CHUNK_LOCALS_GLOBAL)? {
            LuaValue::Table(t) => Some(t),
            _ => None,
        };
        let mut result: LuaValue = lua.globals().get("result")?;
        if result.is_nil() {
            if let Some(locals) = &locals {
                result = locals.get("result")?;
            }
        }
        if !result.is_nil() {
            return to_result_value(&lua, result).map(Some);
        }

        // Fall back to the earliest frame the snippet created.
        let mut earliest: Option<(u64, Table)> = None;
        for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
            let (_, value) = pair?;
            keep_earliest(&value, created_after, &mut earliest);
        }
        if let Some(locals) = locals {
            for pair in locals.pairs::<LuaValue, LuaValue>() {
                let (_, value) = pair?;
                keep_earliest(&value, created_after, &mut earliest);
            }
        }
        Ok(earliest.map(|(_, table)| ResultValue::Table(table)))
    }
}

fn keep_earliest(value: &LuaValue, created_after: u64, earliest: &mut Option<(u64, Table)>) {
    let LuaValue::UserData(ud) = value else {
        return;
    };
    if let Ok(frame) = ud.borrow::<LuaFrame>() {
        let older = earliest.as_ref().map_or(true, |(seq, _)| frame.seq() < *seq);
        if frame.seq() >= created_after && older {
            *earliest = Some((frame.seq(), frame.table().clone()));
        }
    }
}

/// Statement copying every name the snippet declares `local` into
/// [`CHUNK_LOCALS_GLOBAL`], so frames held only in chunk-level locals are
/// still visible after the chunk returns. Names out of scope at the end
/// read as globals, which is harmless.
fn locals_trailer(code: &str) -> String {
    let mut names: Vec<&str> = Vec::new();
    for caps in LOCAL_DECL.captures_iter(code) {
        let Some(list) = caps.get(1) else { continue };
        for piece in list.as_str().split(',') {
            let piece = piece.trim_start();
            let end = piece
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(piece.len());
            let name = &piece[..end];
            if !name.is_empty() && !LUA_KEYWORDS.contains(&name) && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    if names.is_empty() {
        return String::new();
    }
    let fields: Vec<String> = names.iter().map(|n| format!("{n} = {n}")).collect();
    format!("\n{} = {{ {} }}\n", CHUNK_LOCALS_GLOBAL, fields.join(", "))
}

fn to_result_value(lua: &Lua, value: LuaValue) -> LuaResult<ResultValue> {
    Ok(match value {
        LuaValue::UserData(ud) => {
            if let Ok(frame) = ud.borrow::<LuaFrame>() {
                ResultValue::Table(frame.table().clone())
            } else if let Ok(series) = ud.borrow::<LuaSeries>() {
                ResultValue::Series(series.series().clone())
            } else {
                let tostring: LuaFunction = lua.globals().get("tostring")?;
                ResultValue::Text(tostring.call(LuaValue::UserData(ud))?)
            }
        }
        LuaValue::Table(_) => ResultValue::Collection(lua_value_to_json(value)?),
        LuaValue::String(s) => ResultValue::Text(s.to_str()?.to_string()),
        LuaValue::Integer(_) | LuaValue::Number(_) | LuaValue::Boolean(_) => {
            ResultValue::Scalar(lua_value_to_json(value)?)
        }
        other => ResultValue::Text(format!("<{}>", other.type_name())),
    })
}

/// Strip mlua's callback and traceback wrapping down to the message a
/// user can act on.
fn error_message(err: &LuaError) -> String {
    match err {
        LuaError::CallbackError { cause, .. } => error_message(cause),
        LuaError::RuntimeError(msg) => msg.clone(),
        LuaError::SyntaxError { message, .. } => format!("syntax error: {}", message),
        LuaError::MemoryError(_) => "memory limit exceeded".to_string(),
        other => other.to_string(),
    }
}

impl CodeExecutor for LuaSandbox {
    fn execute(&self, code: &str, tables: &BTreeMap<String, Table>) -> ExecutionOutcome {
        if let Err(message) = check_guards(code) {
            tracing::warn!(%message, "snippet rejected");
            return ExecutionOutcome::failure(message);
        }

        let started = Instant::now();
        let outcome = match self.run(code, tables) {
            Ok(Some(value)) => ExecutionOutcome::success(value),
            Ok(None) => ExecutionOutcome::no_result(),
            Err(e) => ExecutionOutcome::failure(error_message(&e)),
        };
        tracing::debug!(
            success = outcome.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snippet executed"
        );
        outcome
    }
}
