//! In-memory tables.
//!
//! A [`Table`] is an ordered list of named, equally long [`Column`]s of
//! typed [`Cell`]s. Tables are loaded from CSV, profiled at ingestion,
//! compared during relationship detection and manipulated by analysis
//! snippets in the sandbox (see [`crate::ops`] for the operations).
//!
//! # Type inference
//!
//! CSV fields arrive as text. Each column gets the narrowest [`DType`]
//! that every non-null field parses as: `int64`, then `float64`, then
//! `bool`, falling back to `object`. Empty fields and the usual missing
//! markers (`NA`, `N/A`, `NaN`, `null`, `None`) become [`Cell::Null`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// A single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical string form used for value-overlap tests and join keys.
    ///
    /// Integral floats drop their fraction so that `3` and `3.0` compare
    /// equal. Returns `None` for null.
    pub fn key(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(format!("{}", *f as i64))
                } else {
                    Some(f.to_string())
                }
            }
            Cell::Str(s) => Some(s.clone()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Bool(_) => 0,
            Cell::Int(_) | Cell::Float(_) => 1,
            Cell::Str(_) => 2,
            Cell::Null => 3,
        }
    }

    /// Total order used for sorting and group keys: booleans, then
    /// numbers, then strings, then nulls.
    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Str(a), Cell::Str(b)) => a.cmp(b),
            (a, b) if a.rank() == 1 && b.rank() == 1 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NaN"),
            Cell::Float(x) => write!(f, "{}", x),
            other => write!(f, "{}", other.key().unwrap_or_default()),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Str(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Str(v)
    }
}

/// Column type, named after the pandas dtypes users recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "int64")]
    Int,
    #[serde(rename = "float64")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "object")]
    Object,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int => "int64",
            DType::Float => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int | DType::Float)
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, DType::Object)
    }

    /// Identical types, or both string-like.
    pub fn compatible_with(&self, other: DType) -> bool {
        *self == other || (self.is_string_like() && other.is_string_like())
    }

    /// Narrowest type that holds every non-null cell.
    pub fn infer(cells: &[Cell]) -> DType {
        let mut saw_any = false;
        let (mut all_int, mut all_num, mut all_bool) = (true, true, true);
        for cell in cells {
            match cell {
                Cell::Null => continue,
                Cell::Int(_) => all_bool = false,
                Cell::Float(_) => {
                    all_int = false;
                    all_bool = false;
                }
                Cell::Bool(_) => {
                    all_int = false;
                    all_num = false;
                }
                Cell::Str(_) => return DType::Object,
            }
            saw_any = true;
        }
        if !saw_any {
            DType::Object
        } else if all_int {
            DType::Int
        } else if all_num {
            DType::Float
        } else if all_bool {
            DType::Bool
        } else {
            DType::Object
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
    pub values: Vec<Cell>,
}

impl Column {
    /// Build a column, inferring its dtype from the values.
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        let dtype = DType::infer(&values);
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Cell> {
        self.values.iter().filter(|c| !c.is_null())
    }

    /// Distinct stringified non-null values, in first-seen order, capped
    /// at `limit` entries.
    pub fn distinct_keys(&self, limit: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in self.values.iter().filter_map(Cell::key) {
            if out.len() >= limit {
                break;
            }
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        out
    }
}

/// Ordered collection of equally long, uniquely named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let n = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != n) {
                return Err(Error::Table(format!(
                    "column '{}' has {} values, expected {}",
                    bad.name,
                    bad.len(),
                    n
                )));
            }
        }
        let mut names = HashSet::new();
        for c in &columns {
            if !names.insert(c.name.as_str()) {
                return Err(Error::Table(format!("duplicate column name '{}'", c.name)));
            }
        }
        Ok(Self { columns })
    }

    /// Build from row-major data, inferring column dtypes.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut values: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (r, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(Error::Table(format!(
                    "row {} has {} values, expected {}",
                    r,
                    row.len(),
                    names.len()
                )));
            }
            for (i, cell) in row.into_iter().enumerate() {
                values[i].push(cell);
            }
        }
        Table::new(
            names
                .into_iter()
                .zip(values)
                .map(|(name, vals)| Column::new(name, vals))
                .collect(),
        )
    }

    /// Parse CSV with a header row.
    ///
    /// Short rows are padded with nulls and long rows truncated. Blank
    /// header names become `Unnamed: <i>` and repeated names get a `.N`
    /// suffix.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let names = dedupe_headers(headers.iter());
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];

        for record in rdr.records() {
            let record = record?;
            for (i, col) in raw.iter_mut().enumerate() {
                let field = record.get(i).unwrap_or("");
                if MISSING_MARKERS.contains(&field.trim()) {
                    col.push(None);
                } else {
                    col.push(Some(field.to_string()));
                }
            }
        }

        Table::new(
            names
                .into_iter()
                .zip(raw)
                .map(|(name, fields)| infer_column(name, fields))
                .collect(),
        )
    }

    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_csv_reader(text.as_bytes())
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column by name, or a table error naming the available columns.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::Table(format!(
                "no column '{}' (available: {})",
                name,
                self.column_names().join(", ")
            ))
        })
    }

    pub fn row(&self, index: usize) -> Vec<Cell> {
        self.columns
            .iter()
            .map(|c| c.values.get(index).cloned().unwrap_or(Cell::Null))
            .collect()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.nrows())
            .map(|r| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[r].to_json()))
                    .collect()
            })
            .collect()
    }

    /// New table made of the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    dtype: c.dtype,
                    values: indices
                        .iter()
                        .map(|&i| c.values.get(i).cloned().unwrap_or(Cell::Null))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Right-aligned text rendering of the first `max_rows` rows with a
    /// leading positional index.
    pub fn to_text(&self, max_rows: usize) -> String {
        let shown = self.nrows().min(max_rows);
        let index_width = shown.saturating_sub(1).to_string().len();
        let cells: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|c| c.values[..shown].iter().map(|v| v.to_string()).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .zip(&cells)
            .map(|(c, vals)| {
                vals.iter()
                    .map(|v| v.chars().count())
                    .chain(std::iter::once(c.name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = " ".repeat(index_width);
        for (c, w) in self.columns.iter().zip(&widths) {
            out.push_str(&format!("  {:>w$}", c.name, w = *w));
        }
        for r in 0..shown {
            out.push('\n');
            out.push_str(&format!("{:>w$}", r, w = index_width));
            for (vals, w) in cells.iter().zip(&widths) {
                out.push_str(&format!("  {:>w$}", vals[r], w = *w));
            }
        }
        out
    }
}

/// A one-dimensional labelled sequence: a column pulled out of a table,
/// or the output of a per-group aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub index: Vec<Cell>,
    pub values: Vec<Cell>,
}

impl Series {
    /// A column with a positional index.
    pub fn from_column(column: &Column) -> Self {
        Self {
            name: Some(column.name.clone()),
            index: (0..column.len() as i64).map(Cell::Int).collect(),
            values: column.values.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index label → value, labels stringified.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.index
            .iter()
            .zip(&self.values)
            .map(|(k, v)| (k.key().unwrap_or_else(|| "NaN".to_string()), v.to_json()))
            .collect()
    }

    /// Two-column table: the index (named `index_name`) and the values.
    pub fn to_table(&self, index_name: &str) -> Result<Table> {
        let value_name = self.name.clone().unwrap_or_else(|| "value".to_string());
        Table::new(vec![
            Column::new(index_name, self.index.clone()),
            Column::new(value_name, self.values.clone()),
        ])
    }
}

fn dedupe_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("Unnamed: {}", i)
            } else {
                h.trim().to_string()
            };
            let mut name = base.clone();
            let mut n = 1;
            while seen.contains(&name) {
                name = format!("{}.{}", base, n);
                n += 1;
            }
            seen.insert(name.clone());
            name
        })
        .collect()
}

fn infer_column(name: String, fields: Vec<Option<String>>) -> Column {
    let present = || fields.iter().flatten().map(|s| s.trim());

    let dtype = if present().next().is_none() {
        DType::Object
    } else if present().all(|s| s.parse::<i64>().is_ok()) {
        DType::Int
    } else if present().all(|s| s.parse::<f64>().is_ok()) {
        DType::Float
    } else if present().all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")) {
        DType::Bool
    } else {
        DType::Object
    };

    let values = fields
        .into_iter()
        .map(|f| match f {
            None => Cell::Null,
            Some(s) => {
                let t = s.trim();
                match dtype {
                    DType::Int => t.parse().map(Cell::Int).unwrap_or(Cell::Null),
                    DType::Float => t.parse().map(Cell::Float).unwrap_or(Cell::Null),
                    DType::Bool => Cell::Bool(t.eq_ignore_ascii_case("true")),
                    DType::Object => Cell::Str(s),
                }
            }
        })
        .collect();

    Column {
        name,
        dtype,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = "order_id,customer_id,amount,paid\n1,10,25.5,true\n2,11,,false\n3,10,7,TRUE\n";

    #[test]
    fn test_csv_dtype_inference() {
        let t = Table::from_csv_str(ORDERS).unwrap();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.ncols(), 4);
        assert_eq!(t.column("order_id").unwrap().dtype, DType::Int);
        assert_eq!(t.column("amount").unwrap().dtype, DType::Float);
        assert_eq!(t.column("paid").unwrap().dtype, DType::Bool);
        assert_eq!(t.column("amount").unwrap().values[1], Cell::Null);
    }

    #[test]
    fn test_mixed_column_is_object() {
        let t = Table::from_csv_str("code\n12\nA7\n").unwrap();
        let c = t.column("code").unwrap();
        assert_eq!(c.dtype, DType::Object);
        assert_eq!(c.values[0], Cell::Str("12".into()));
    }

    #[test]
    fn test_all_missing_column_is_object() {
        let t = Table::from_csv_str("a,b\n1,\n2,NA\n").unwrap();
        assert_eq!(t.column("b").unwrap().dtype, DType::Object);
        assert!(t.column("b").unwrap().values.iter().all(Cell::is_null));
    }

    #[test]
    fn test_headers_deduped_and_short_rows_padded() {
        let t = Table::from_csv_str("x,x,\n1,2\n").unwrap();
        assert_eq!(t.column_names(), vec!["x", "x.1", "Unnamed: 2"]);
        assert_eq!(t.row(0)[2], Cell::Null);
    }

    #[test]
    fn test_key_normalizes_integral_floats() {
        assert_eq!(Cell::Float(3.0).key().as_deref(), Some("3"));
        assert_eq!(Cell::Int(3).key().as_deref(), Some("3"));
        assert_eq!(Cell::Float(2.5).key().as_deref(), Some("2.5"));
        assert_eq!(Cell::Null.key(), None);
    }

    #[test]
    fn test_compatibility() {
        assert!(DType::Int.compatible_with(DType::Int));
        assert!(DType::Object.compatible_with(DType::Object));
        assert!(!DType::Int.compatible_with(DType::Float));
        assert!(!DType::Int.compatible_with(DType::Object));
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let err = Table::new(vec![
            Column::new("a", vec![Cell::Int(1)]),
            Column::new("b", vec![]),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_to_text_has_header_and_rows() {
        let t = Table::from_csv_str(ORDERS).unwrap();
        let text = t.to_text(2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("customer_id"));
        assert!(lines[1].contains("25.5"));
    }

    #[test]
    fn test_series_map_uses_string_labels() {
        let s = Series {
            name: Some("count".into()),
            index: vec![Cell::Int(10), Cell::Int(11)],
            values: vec![Cell::Int(2), Cell::Int(1)],
        };
        let m = s.to_map();
        assert_eq!(m["10"], 2);
        assert_eq!(m["11"], 1);
    }
}
