//! Lua bindings for the table model: `DataFrame`, `Series` and `GroupBy`
//! userdata wrapping [`Table`], [`Series`] and [`Grouped`].
//!
//! Every operation returns a new value; frames are never mutated in
//! place. Each frame carries a creation sequence number so the sandbox
//! can tell which frames a snippet created, and in what order.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::prelude::*;
use mlua::{MetaMethod, UserDataRef};

use tabula_core::ops::{AggFn, CmpOp, Grouped, JoinHow};
use tabula_core::table::{Cell, Column, Series, Table};

use crate::lua_runtime::{cell_to_lua, lua_to_cell};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

const DEFAULT_HEAD: usize = 5;
const TOSTRING_ROWS: usize = 10;

fn table_err(e: tabula_core::Error) -> LuaError {
    LuaError::RuntimeError(e.to_string())
}

/// Sequence number the next frame will get.
pub(crate) fn next_seq() -> u64 {
    NEXT_SEQ.load(Ordering::SeqCst)
}

// ============ DataFrame ============

#[derive(Debug, Clone)]
pub struct LuaFrame {
    table: Table,
    seq: u64,
}

impl LuaFrame {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            seq: NEXT_SEQ.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A column name or a list of them.
fn names_arg(value: LuaValue) -> LuaResult<Vec<String>> {
    match value {
        LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
        LuaValue::Table(t) => t.sequence_values::<String>().collect(),
        LuaValue::Nil => Ok(Vec::new()),
        other => Err(LuaError::RuntimeError(format!(
            "expected a column name or a list of names, got {}",
            other.type_name()
        ))),
    }
}

fn row_table(lua: &Lua, table: &Table, r: usize) -> LuaResult<LuaTable> {
    let row = lua.create_table()?;
    for col in table.columns() {
        row.set(col.name.as_str(), cell_to_lua(lua, &col.values[r])?)?;
    }
    Ok(row)
}

fn cells_to_list(lua: &Lua, cells: impl IntoIterator<Item = Cell>) -> LuaResult<LuaTable> {
    let list = lua.create_table()?;
    let mut i = 1i64;
    for cell in cells {
        if cell.is_null() {
            continue;
        }
        list.set(i, cell_to_lua(lua, &cell)?)?;
        i += 1;
    }
    Ok(list)
}

fn column_agg(table: &Table, column: &str, func: AggFn) -> LuaResult<Cell> {
    let col = table.require(column).map_err(table_err)?;
    func.apply(&col.values).map_err(table_err)
}

fn merge_keys(opts: &Option<LuaTable>, left: &Table, right: &Table) -> LuaResult<(Vec<String>, Vec<String>)> {
    if let Some(opts) = opts {
        let on = names_arg(opts.get("on")?)?;
        if !on.is_empty() {
            return Ok((on.clone(), on));
        }
        let left_on = names_arg(opts.get("left_on")?)?;
        let right_on = names_arg(opts.get("right_on")?)?;
        if !left_on.is_empty() || !right_on.is_empty() {
            return Ok((left_on, right_on));
        }
    }
    // No keys given: join on every shared column name.
    let right_names: HashSet<String> = right.column_names().into_iter().collect();
    let shared: Vec<String> = left
        .column_names()
        .into_iter()
        .filter(|n| right_names.contains(n))
        .collect();
    if shared.is_empty() {
        return Err(LuaError::RuntimeError(
            "merge: no key columns given and no shared column names".to_string(),
        ));
    }
    Ok((shared.clone(), shared))
}

impl LuaUserData for LuaFrame {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("nrows", |_, this, ()| Ok(this.table.nrows()));
        methods.add_method("ncols", |_, this, ()| Ok(this.table.ncols()));
        methods.add_method("columns", |_, this, ()| Ok(this.table.column_names()));
        methods.add_method("shape", |_, this, ()| {
            Ok(vec![this.table.nrows(), this.table.ncols()])
        });

        methods.add_method("head", |_, this, n: Option<usize>| {
            Ok(LuaFrame::new(this.table.head(n.unwrap_or(DEFAULT_HEAD))))
        });
        methods.add_method("tail", |_, this, n: Option<usize>| {
            Ok(LuaFrame::new(this.table.tail(n.unwrap_or(DEFAULT_HEAD))))
        });
        methods.add_method("select", |_, this, names: LuaValue| {
            let names = names_arg(names)?;
            Ok(LuaFrame::new(this.table.select(&names).map_err(table_err)?))
        });

        methods.add_method("filter", |lua, this, predicate: LuaFunction| {
            let mut mask = Vec::with_capacity(this.table.nrows());
            for r in 0..this.table.nrows() {
                let keep: LuaValue = predicate.call(row_table(lua, &this.table, r)?)?;
                mask.push(!matches!(keep, LuaValue::Nil | LuaValue::Boolean(false)));
            }
            Ok(LuaFrame::new(this.table.filter_mask(&mask).map_err(table_err)?))
        });
        methods.add_method(
            "where",
            |_, this, (column, op, value): (String, String, LuaValue)| {
                let op = CmpOp::parse(&op).map_err(table_err)?;
                let value = lua_to_cell(&value)?;
                Ok(LuaFrame::new(
                    this.table.filter_cmp(&column, op, &value).map_err(table_err)?,
                ))
            },
        );
        methods.add_method("sort", |_, this, (columns, ascending): (LuaValue, Option<bool>)| {
            let columns = names_arg(columns)?;
            Ok(LuaFrame::new(
                this.table
                    .sort_by(&columns, ascending.unwrap_or(true))
                    .map_err(table_err)?,
            ))
        });

        methods.add_method(
            "merge",
            |_, this, (other, opts): (UserDataRef<LuaFrame>, Option<LuaTable>)| {
                let (left_on, right_on) = merge_keys(&opts, &this.table, &other.table)?;
                let how = match &opts {
                    Some(o) => o.get::<Option<String>>("how")?,
                    None => None,
                };
                let how = JoinHow::parse(how.as_deref().unwrap_or("inner")).map_err(table_err)?;
                Ok(LuaFrame::new(
                    this.table
                        .merge(&other.table, &left_on, &right_on, how)
                        .map_err(table_err)?,
                ))
            },
        );
        methods.add_method("groupby", |_, this, keys: LuaValue| {
            let keys = names_arg(keys)?;
            Ok(LuaGroupBy {
                grouped: this.table.group_by(&keys).map_err(table_err)?,
            })
        });

        methods.add_method("value_counts", |_, this, column: String| {
            Ok(LuaSeries::new(this.table.value_counts(&column).map_err(table_err)?))
        });
        methods.add_method("column", |_, this, column: String| {
            Ok(LuaSeries::new(this.table.series(&column).map_err(table_err)?))
        });
        methods.add_method("unique", |lua, this, column: String| {
            cells_to_list(lua, this.table.unique(&column).map_err(table_err)?)
        });

        for (name, func) in [
            ("nunique", AggFn::NUnique),
            ("sum", AggFn::Sum),
            ("mean", AggFn::Mean),
            ("min", AggFn::Min),
            ("max", AggFn::Max),
            ("count", AggFn::Count),
        ] {
            methods.add_method(name, move |lua, this, column: String| {
                cell_to_lua(lua, &column_agg(&this.table, &column, func)?)
            });
        }

        methods.add_method("rename", |_, this, mapping: LuaTable| {
            let mut renames = BTreeMap::new();
            for pair in mapping.pairs::<String, String>() {
                let (old, new) = pair?;
                renames.insert(old, new);
            }
            Ok(LuaFrame::new(this.table.rename(&renames).map_err(table_err)?))
        });
        methods.add_method("mutate", |lua, this, (name, source): (String, LuaValue)| {
            let n = this.table.nrows();
            let values: Vec<Cell> = match source {
                LuaValue::Function(f) => (0..n)
                    .map(|r| {
                        let v: LuaValue = f.call(row_table(lua, &this.table, r)?)?;
                        lua_to_cell(&v)
                    })
                    .collect::<LuaResult<_>>()?,
                LuaValue::Table(list) => (1..=n as i64)
                    .map(|i| lua_to_cell(&list.raw_get::<LuaValue>(i)?))
                    .collect::<LuaResult<_>>()?,
                LuaValue::UserData(ud) => {
                    let series = ud.borrow::<LuaSeries>()?;
                    series.series.values.clone()
                }
                scalar => vec![lua_to_cell(&scalar)?; n],
            };
            Ok(LuaFrame::new(
                this.table.with_column(&name, values).map_err(table_err)?,
            ))
        });
        methods.add_method("drop_nulls", |_, this, columns: Option<LuaValue>| {
            let columns = names_arg(columns.unwrap_or(LuaValue::Nil))?;
            Ok(LuaFrame::new(this.table.drop_nulls(&columns).map_err(table_err)?))
        });
        methods.add_method("distinct", |_, this, ()| {
            Ok(LuaFrame::new(this.table.distinct()))
        });

        methods.add_method("rows", |lua, this, ()| {
            let rows = lua.create_table()?;
            for r in 0..this.table.nrows() {
                rows.set(r as i64 + 1, row_table(lua, &this.table, r)?)?;
            }
            Ok(rows)
        });
        methods.add_method("row", |lua, this, i: usize| {
            if i == 0 || i > this.table.nrows() {
                return Err(LuaError::RuntimeError(format!(
                    "row {} out of range (1..{})",
                    i,
                    this.table.nrows()
                )));
            }
            row_table(lua, &this.table, i - 1)
        });
        methods.add_method("describe", |_, this, ()| {
            Ok(LuaFrame::new(this.table.describe().map_err(table_err)?))
        });

        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.table.nrows()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(this.table.to_text(TOSTRING_ROWS))
        });
    }
}

// ============ Series ============

#[derive(Debug, Clone)]
pub struct LuaSeries {
    series: Series,
}

impl LuaSeries {
    pub fn new(series: Series) -> Self {
        Self { series }
    }

    pub fn series(&self) -> &Series {
        &self.series
    }
}

impl LuaUserData for LuaSeries {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        for (name, func) in [
            ("sum", AggFn::Sum),
            ("mean", AggFn::Mean),
            ("min", AggFn::Min),
            ("max", AggFn::Max),
            ("count", AggFn::Count),
            ("nunique", AggFn::NUnique),
        ] {
            methods.add_method(name, move |lua, this, ()| {
                cell_to_lua(lua, &this.series.aggregate(func).map_err(table_err)?)
            });
        }

        methods.add_method("name", |_, this, ()| Ok(this.series.name.clone()));
        methods.add_method("values", |lua, this, ()| {
            cells_to_list(lua, this.series.values.clone())
        });
        methods.add_method("unique", |lua, this, ()| {
            let mut seen = HashSet::new();
            let cells: Vec<Cell> = this
                .series
                .values
                .iter()
                .filter(|c| seen.insert(c.key()))
                .cloned()
                .collect();
            cells_to_list(lua, cells)
        });
        methods.add_method("get", |lua, this, label: LuaValue| {
            let key = lua_to_cell(&label)?.key();
            match this.series.index.iter().position(|i| i.key() == key) {
                Some(pos) => cell_to_lua(lua, &this.series.values[pos]),
                None => Ok(LuaValue::Nil),
            }
        });
        methods.add_method("sort", |_, this, ascending: Option<bool>| {
            Ok(LuaSeries::new(this.series.sort_values(ascending.unwrap_or(true))))
        });
        methods.add_method("head", |_, this, n: Option<usize>| {
            Ok(LuaSeries::new(this.series.head(n.unwrap_or(DEFAULT_HEAD))))
        });
        methods.add_method("to_frame", |_, this, index_name: Option<String>| {
            let table = this
                .series
                .to_table(index_name.as_deref().unwrap_or("index"))
                .map_err(table_err)?;
            Ok(LuaFrame::new(table))
        });

        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.series.len()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let table = this.series.to_table("index").map_err(table_err)?;
            Ok(table.to_text(TOSTRING_ROWS))
        });
    }
}

// ============ GroupBy ============

#[derive(Debug, Clone)]
pub struct LuaGroupBy {
    grouped: Grouped,
}

impl LuaGroupBy {
    fn apply(&self, column: Option<String>, func: AggFn) -> LuaResult<LuaFrame> {
        let table = match column {
            Some(c) => self.grouped.agg_column(&c, func),
            None => self.grouped.agg_all(func),
        };
        Ok(LuaFrame::new(table.map_err(table_err)?))
    }
}

impl LuaUserData for LuaGroupBy {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        for (name, func) in [
            ("count", AggFn::Count),
            ("sum", AggFn::Sum),
            ("mean", AggFn::Mean),
            ("min", AggFn::Min),
            ("max", AggFn::Max),
            ("nunique", AggFn::NUnique),
            ("first", AggFn::First),
        ] {
            methods.add_method(name, move |_, this, column: Option<String>| {
                this.apply(column, func)
            });
        }
        methods.add_method("size", |_, this, ()| {
            Ok(LuaFrame::new(this.grouped.size().map_err(table_err)?))
        });

        // agg({out = {"column", "fn"}, other = "fn"}), outputs ordered by name.
        methods.add_method("agg", |_, this, spec: LuaTable| {
            let mut specs: Vec<(String, AggFn, String)> = Vec::new();
            for pair in spec.pairs::<String, LuaValue>() {
                let (out, value) = pair?;
                let (column, func) = match value {
                    LuaValue::String(f) => (out.clone(), f.to_str()?.to_string()),
                    LuaValue::Table(t) => (t.raw_get::<String>(1)?, t.raw_get::<String>(2)?),
                    other => {
                        return Err(LuaError::RuntimeError(format!(
                            "agg: spec for '{}' must be a function name or {{column, function}}, got {}",
                            out,
                            other.type_name()
                        )))
                    }
                };
                specs.push((column, AggFn::parse(&func).map_err(table_err)?, out));
            }
            specs.sort_by(|a, b| a.2.cmp(&b.2));
            Ok(LuaFrame::new(this.grouped.agg(&specs).map_err(table_err)?))
        });

        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.grouped.len()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!(
                "GroupBy(keys = [{}], groups = {})",
                this.grouped.keys().join(", "),
                this.grouped.len()
            ))
        });
    }
}

// ============ Constructors ============

/// Register the global `DataFrame` table with `new` and `from_records`.
pub(crate) fn register_frame_api(lua: &Lua) -> LuaResult<()> {
    let df = lua.create_table()?;

    // DataFrame.new({col = {...}}, order?)
    df.set(
        "new",
        lua.create_function(|_lua, (spec, order): (LuaTable, Option<Vec<String>>)| {
            let mut columns: BTreeMap<String, Vec<Cell>> = BTreeMap::new();
            for pair in spec.pairs::<String, LuaTable>() {
                let (name, values) = pair?;
                let cells = (1..=values.raw_len() as i64)
                    .map(|i| lua_to_cell(&values.raw_get::<LuaValue>(i)?))
                    .collect::<LuaResult<Vec<_>>>()?;
                columns.insert(name, cells);
            }
            let names = order.unwrap_or_else(|| columns.keys().cloned().collect());
            let cols = names
                .into_iter()
                .map(|n| {
                    let values = columns.remove(&n).ok_or_else(|| {
                        LuaError::RuntimeError(format!("DataFrame.new: no values for column '{}'", n))
                    })?;
                    Ok(Column::new(n, values))
                })
                .collect::<LuaResult<Vec<_>>>()?;
            Ok(LuaFrame::new(Table::new(cols).map_err(table_err)?))
        })?,
    )?;

    // DataFrame.from_records({{col = v}, ...}, order?)
    df.set(
        "from_records",
        lua.create_function(|_lua, (records, order): (LuaTable, Option<Vec<String>>)| {
            let rows: Vec<LuaTable> = records.sequence_values::<LuaTable>().collect::<LuaResult<_>>()?;
            let names = match order {
                Some(o) => o,
                None => {
                    let mut all = BTreeSet::new();
                    for row in &rows {
                        for pair in row.pairs::<String, LuaValue>() {
                            all.insert(pair?.0);
                        }
                    }
                    all.into_iter().collect()
                }
            };
            let cells = rows
                .iter()
                .map(|row| {
                    names
                        .iter()
                        .map(|n| lua_to_cell(&row.get::<LuaValue>(n.as_str())?))
                        .collect::<LuaResult<Vec<_>>>()
                })
                .collect::<LuaResult<Vec<_>>>()?;
            Ok(LuaFrame::new(Table::from_rows(names, cells).map_err(table_err)?))
        })?,
    )?;

    lua.globals().set("DataFrame", df)?;
    Ok(())
}
