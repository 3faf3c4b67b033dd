//! Lua 5.4 VM setup shared by the analysis sandbox.
//!
//! Provides the restricted global environment generated snippets run in,
//! the host APIs they may call, and value conversions between Lua, JSON
//! and table cells.
//!
//! # Host APIs
//!
//! | Global | Functions |
//! |--------|-----------|
//! | `json` | `parse`, `encode` |
//! | `log` | `info`, `warn`, `error`, `debug` (routed to `tracing`, target `sandbox`) |
//! | `print` | routed to `log.debug` |
//! | `read_csv` | `read_csv(path)` (confined to the data root) |
//!
//! # Sandboxing
//!
//! `os`, `io`, `debug`, `package`, `require`, `load`, `loadfile` and
//! `dofile` are removed. `read_csv` canonicalizes its argument and rejects
//! anything outside the configured data root.

use mlua::prelude::*;
use std::path::{Path, PathBuf};

use tabula_core::table::{Cell, Table};

use crate::frame::LuaFrame;

// ═══════════════════════════════════════════════════════════════════════
// Public helpers
// ═══════════════════════════════════════════════════════════════════════

/// Sandbox the globals and register every host API on `lua`.
pub(crate) fn register_all_host_apis(lua: &Lua, data_root: &Path) -> LuaResult<()> {
    sandbox_globals(lua)?;
    register_json_api(lua)?;
    register_log_api(lua)?;
    register_read_csv(lua, data_root)?;
    crate::frame::register_frame_api(lua)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Sandboxing
// ═══════════════════════════════════════════════════════════════════════

/// Remove every global that reaches outside the VM.
pub(crate) fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in [
        "os", "io", "debug", "package", "require", "load", "loadfile", "dofile",
    ] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: json
// ═══════════════════════════════════════════════════════════════════════

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let json_table = lua.create_table()?;

    json_table.set(
        "parse",
        lua.create_function(|lua, s: String| {
            let value: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| LuaError::RuntimeError(format!("json.parse: {}", e)))?;
            json_value_to_lua(lua, &value)
        })?,
    )?;

    json_table.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            let json = lua_value_to_json(value)?;
            serde_json::to_string(&json)
                .map_err(|e| LuaError::RuntimeError(format!("json.encode: {}", e)))
        })?,
    )?;

    lua.globals().set("json", json_table)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

fn register_log_api(lua: &Lua) -> LuaResult<()> {
    let log = lua.create_table()?;

    log.set(
        "info",
        lua.create_function(|_lua, msg: String| {
            tracing::info!(target: "sandbox", "{}", msg);
            Ok(())
        })?,
    )?;
    log.set(
        "warn",
        lua.create_function(|_lua, msg: String| {
            tracing::warn!(target: "sandbox", "{}", msg);
            Ok(())
        })?,
    )?;
    log.set(
        "error",
        lua.create_function(|_lua, msg: String| {
            tracing::error!(target: "sandbox", "{}", msg);
            Ok(())
        })?,
    )?;
    let debug = lua.create_function(|_lua, msg: String| {
        tracing::debug!(target: "sandbox", "{}", msg);
        Ok(())
    })?;
    log.set("debug", debug)?;

    lua.globals().set(
        "print",
        lua.create_function(|_lua, args: LuaMultiValue| {
            let parts: Vec<String> = args.iter().map(display_value).collect();
            tracing::debug!(target: "sandbox", "{}", parts.join("\t"));
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::UserData(ud) => match ud.borrow::<LuaFrame>() {
            Ok(frame) => frame.table().to_text(10),
            Err(_) => "<userdata>".to_string(),
        },
        other => format!("<{}>", other.type_name()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: read_csv (sandboxed)
// ═══════════════════════════════════════════════════════════════════════

fn register_read_csv(lua: &Lua, data_root: &Path) -> LuaResult<()> {
    let root: PathBuf = data_root
        .canonicalize()
        .unwrap_or_else(|_| data_root.to_path_buf());

    lua.globals().set(
        "read_csv",
        lua.create_function(move |_lua, path: String| {
            let candidate = Path::new(&path);
            let target = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                root.join(candidate)
            };
            let canonical = target
                .canonicalize()
                .map_err(|e| LuaError::RuntimeError(format!("read_csv: {}: {}", path, e)))?;
            if !canonical.starts_with(&root) {
                return Err(LuaError::RuntimeError(format!(
                    "read_csv: path escapes data root: {}",
                    path
                )));
            }
            let file = std::fs::File::open(&canonical)
                .map_err(|e| LuaError::RuntimeError(format!("read_csv: {}: {}", path, e)))?;
            let table = Table::from_csv_reader(file)
                .map_err(|e| LuaError::RuntimeError(format!("read_csv: {}: {}", path, e)))?;
            Ok(LuaFrame::new(table))
        })?,
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Value Conversions: Cell ↔ Lua
// ═══════════════════════════════════════════════════════════════════════

pub(crate) fn cell_to_lua(lua: &Lua, cell: &Cell) -> LuaResult<LuaValue> {
    Ok(match cell {
        Cell::Null => LuaValue::Nil,
        Cell::Bool(b) => LuaValue::Boolean(*b),
        Cell::Int(i) => LuaValue::Integer(*i),
        Cell::Float(f) => LuaValue::Number(*f),
        Cell::Str(s) => LuaValue::String(lua.create_string(s)?),
    })
}

pub(crate) fn lua_to_cell(value: &LuaValue) -> LuaResult<Cell> {
    Ok(match value {
        LuaValue::Nil => Cell::Null,
        LuaValue::Boolean(b) => Cell::Bool(*b),
        LuaValue::Integer(i) => Cell::Int(*i),
        LuaValue::Number(n) if n.is_nan() => Cell::Null,
        LuaValue::Number(n) => Cell::Float(*n),
        LuaValue::String(s) => Cell::Str(s.to_str()?.to_string()),
        other => {
            return Err(LuaError::RuntimeError(format!(
                "cannot store a {} in a table cell",
                other.type_name()
            )))
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Value Conversions: JSON ↔ Lua
// ═══════════════════════════════════════════════════════════════════════

/// Convert a JSON value to a Lua value.
pub(crate) fn json_value_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    match value {
        serde_json::Value::Null => Ok(LuaValue::Nil),
        serde_json::Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => lua.create_string(s).map(LuaValue::String),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i as i64 + 1, json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert a Lua value to a JSON value. Frames become record lists and
/// series become label → value maps.
pub(crate) fn lua_value_to_json(value: LuaValue) -> LuaResult<serde_json::Value> {
    match value {
        LuaValue::Nil => Ok(serde_json::Value::Null),
        LuaValue::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        LuaValue::Integer(i) => Ok(serde_json::Value::Number(i.into())),
        LuaValue::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        LuaValue::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        LuaValue::Table(t) => {
            // Heuristic: if raw_len > 0, treat as array; otherwise as object
            let len = t.raw_len();
            if len > 0 {
                let mut arr = Vec::new();
                for i in 1..=len {
                    let v: LuaValue = t.raw_get(i)?;
                    arr.push(lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Array(arr))
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<LuaValue, LuaValue>() {
                    let (k, v) = pair?;
                    let key = match k {
                        LuaValue::String(s) => s.to_str()?.to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        LuaValue::Number(n) => n.to_string(),
                        LuaValue::Boolean(b) => b.to_string(),
                        _ => continue,
                    };
                    map.insert(key, lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        LuaValue::UserData(ud) => {
            if let Ok(frame) = ud.borrow::<LuaFrame>() {
                return Ok(serde_json::Value::Array(
                    frame
                        .table()
                        .to_records()
                        .into_iter()
                        .map(serde_json::Value::Object)
                        .collect(),
                ));
            }
            if let Ok(series) = ud.borrow::<crate::frame::LuaSeries>() {
                return Ok(serde_json::Value::Object(series.series().to_map()));
            }
            Ok(serde_json::Value::Null)
        }
        _ => Ok(serde_json::Value::Null),
    }
}
