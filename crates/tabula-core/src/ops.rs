//! Table operations used by analysis snippets.
//!
//! Every operation is pure: it borrows its input table(s) and returns a
//! new [`Table`] or [`Series`]. Row order is preserved unless the
//! operation is a sort or a grouping, whose groups come out ordered by
//! key.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::table::{Cell, Column, DType, Series, Table};

/// Comparison used by [`Table::filter_cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CmpOp {
    pub fn parse(op: &str) -> Result<Self> {
        Ok(match op.trim() {
            "==" | "=" => CmpOp::Eq,
            "!=" | "~=" | "<>" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            "contains" => CmpOp::Contains,
            other => return Err(Error::Table(format!("unknown comparison '{}'", other))),
        })
    }

    /// Nulls never satisfy a comparison.
    pub fn test(&self, left: &Cell, right: &Cell) -> bool {
        if left.is_null() || right.is_null() {
            return false;
        }
        match self {
            CmpOp::Eq => left.key() == right.key(),
            CmpOp::Ne => left.key() != right.key(),
            CmpOp::Contains => match (left.key(), right.key()) {
                (Some(l), Some(r)) => l.contains(&r),
                _ => false,
            },
            ordering => {
                let ord = left.compare(right);
                match ordering {
                    CmpOp::Lt => ord.is_lt(),
                    CmpOp::Le => ord.is_le(),
                    CmpOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinHow {
    pub fn parse(how: &str) -> Result<Self> {
        Ok(match how {
            "inner" => JoinHow::Inner,
            "left" => JoinHow::Left,
            "right" => JoinHow::Right,
            "outer" | "full" => JoinHow::Outer,
            other => return Err(Error::Table(format!("unknown join type '{}'", other))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Count,
    Size,
    Sum,
    Mean,
    Min,
    Max,
    NUnique,
    First,
}

impl AggFn {
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "count" => AggFn::Count,
            "size" => AggFn::Size,
            "sum" => AggFn::Sum,
            "mean" | "avg" => AggFn::Mean,
            "min" => AggFn::Min,
            "max" => AggFn::Max,
            "nunique" => AggFn::NUnique,
            "first" => AggFn::First,
            other => return Err(Error::Table(format!("unknown aggregation '{}'", other))),
        })
    }

    /// Reduce a slice of cells. Nulls are skipped by everything except
    /// `size`.
    pub fn apply(&self, values: &[Cell]) -> Result<Cell> {
        let present = || values.iter().filter(|c| !c.is_null());
        Ok(match self {
            AggFn::Size => Cell::Int(values.len() as i64),
            AggFn::Count => Cell::Int(present().count() as i64),
            AggFn::NUnique => {
                Cell::Int(present().filter_map(Cell::key).collect::<HashSet<_>>().len() as i64)
            }
            AggFn::First => present().next().cloned().unwrap_or(Cell::Null),
            AggFn::Min => present()
                .min_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(Cell::Null),
            AggFn::Max => present()
                .max_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(Cell::Null),
            AggFn::Sum => {
                let mut int_sum: i64 = 0;
                let mut float_sum = 0.0;
                let mut all_int = true;
                for cell in present() {
                    match cell {
                        Cell::Int(i) => {
                            // Overflow switches the sum to floating point.
                            match int_sum.checked_add(*i) {
                                Some(sum) => int_sum = sum,
                                None => all_int = false,
                            }
                            float_sum += *i as f64;
                        }
                        Cell::Float(f) => {
                            all_int = false;
                            float_sum += f;
                        }
                        other => {
                            return Err(Error::Table(format!("cannot sum non-numeric value {}", other)))
                        }
                    }
                }
                if all_int {
                    Cell::Int(int_sum)
                } else {
                    Cell::Float(float_sum)
                }
            }
            AggFn::Mean => {
                let nums = numeric(present())?;
                if nums.is_empty() {
                    Cell::Null
                } else {
                    Cell::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
        })
    }
}

fn numeric<'a>(cells: impl Iterator<Item = &'a Cell>) -> Result<Vec<f64>> {
    cells
        .map(|c| {
            c.as_f64()
                .ok_or_else(|| Error::Table(format!("expected a number, found {}", c)))
        })
        .collect()
}

/// Rows of a table partitioned by key columns.
///
/// Groups are ordered by key. Rows whose key contains a null are
/// dropped.
#[derive(Debug, Clone)]
pub struct Grouped {
    source: Table,
    keys: Vec<String>,
    groups: Vec<(Vec<Cell>, Vec<usize>)>,
}

impl Grouped {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// One row per group: the key columns followed by one column per
    /// `(column, function, output name)` triple.
    pub fn agg(&self, specs: &[(String, AggFn, String)]) -> Result<Table> {
        let mut columns: Vec<Column> = self
            .keys
            .iter()
            .enumerate()
            .map(|(k, name)| {
                Column::new(
                    name.clone(),
                    self.groups.iter().map(|(key, _)| key[k].clone()).collect(),
                )
            })
            .collect();

        for (col, func, out) in specs {
            let values = if *func == AggFn::Size {
                self.groups
                    .iter()
                    .map(|(_, rows)| Cell::Int(rows.len() as i64))
                    .collect()
            } else {
                let source = self.source.require(col)?;
                self.groups
                    .iter()
                    .map(|(_, rows)| {
                        let cells: Vec<Cell> =
                            rows.iter().map(|&r| source.values[r].clone()).collect();
                        func.apply(&cells)
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            columns.push(Column::new(out.clone(), values));
        }
        Table::new(columns)
    }

    /// Apply one function to one column. Output column keeps the source
    /// column's name.
    pub fn agg_column(&self, column: &str, func: AggFn) -> Result<Table> {
        self.agg(&[(column.to_string(), func, column.to_string())])
    }

    /// Row count per group in a column named `size`.
    pub fn size(&self) -> Result<Table> {
        self.agg(&[(String::new(), AggFn::Size, "size".to_string())])
    }

    /// Apply `func` to every non-key column that supports it.
    pub fn agg_all(&self, func: AggFn) -> Result<Table> {
        let specs: Vec<(String, AggFn, String)> = self
            .source
            .columns()
            .iter()
            .filter(|c| !self.keys.contains(&c.name))
            .filter(|c| match func {
                AggFn::Sum | AggFn::Mean => c.dtype.is_numeric(),
                _ => true,
            })
            .map(|c| (c.name.clone(), func, c.name.clone()))
            .collect();
        self.agg(&specs)
    }
}

impl Table {
    pub fn head(&self, n: usize) -> Table {
        let n = n.min(self.nrows());
        self.take_rows(&(0..n).collect::<Vec<_>>())
    }

    pub fn tail(&self, n: usize) -> Table {
        let total = self.nrows();
        let start = total.saturating_sub(n);
        self.take_rows(&(start..total).collect::<Vec<_>>())
    }

    pub fn select(&self, names: &[String]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|n| self.require(n).cloned())
            .collect::<Result<Vec<_>>>()?;
        Table::new(columns)
    }

    pub fn filter_mask(&self, mask: &[bool]) -> Result<Table> {
        if mask.len() != self.nrows() {
            return Err(Error::Table(format!(
                "mask has {} entries for {} rows",
                mask.len(),
                self.nrows()
            )));
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&rows))
    }

    /// Rows where `column <op> value`.
    pub fn filter_cmp(&self, column: &str, op: CmpOp, value: &Cell) -> Result<Table> {
        let col = self.require(column)?;
        let mask: Vec<bool> = col.values.iter().map(|v| op.test(v, value)).collect();
        self.filter_mask(&mask)
    }

    /// Stable sort on one or more columns. Nulls sort last in either
    /// direction.
    pub fn sort_by(&self, columns: &[String], ascending: bool) -> Result<Table> {
        let keys = columns
            .iter()
            .map(|c| self.require(c))
            .collect::<Result<Vec<_>>>()?;
        let mut rows: Vec<usize> = (0..self.nrows()).collect();
        rows.sort_by(|&a, &b| {
            for col in &keys {
                let (x, y) = (&col.values[a], &col.values[b]);
                let ord = match (x.is_null(), y.is_null()) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => std::cmp::Ordering::Greater,
                    (false, true) => std::cmp::Ordering::Less,
                    _ if ascending => x.compare(y),
                    _ => y.compare(x),
                };
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(self.take_rows(&rows))
    }

    /// Join with `other` on key columns.
    ///
    /// A key column with the same name on both sides appears once.
    /// Other clashing names get `_x` (left) and `_y` (right) suffixes.
    /// Rows with a null key never match.
    pub fn merge(
        &self,
        other: &Table,
        left_on: &[String],
        right_on: &[String],
        how: JoinHow,
    ) -> Result<Table> {
        if left_on.is_empty() || left_on.len() != right_on.len() {
            return Err(Error::Table(
                "merge needs the same non-zero number of left and right keys".to_string(),
            ));
        }
        let lkeys = left_on
            .iter()
            .map(|c| self.require(c))
            .collect::<Result<Vec<_>>>()?;
        let rkeys = right_on
            .iter()
            .map(|c| other.require(c))
            .collect::<Result<Vec<_>>>()?;

        let row_key = |cols: &[&Column], r: usize| -> Option<Vec<String>> {
            cols.iter().map(|c| c.values[r].key()).collect()
        };

        let mut right_index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for j in 0..other.nrows() {
            if let Some(key) = row_key(&rkeys, j) {
                right_index.entry(key).or_default().push(j);
            }
        }

        let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        let mut right_matched = vec![false; other.nrows()];
        match how {
            JoinHow::Right => {
                let mut left_index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
                for i in 0..self.nrows() {
                    if let Some(key) = row_key(&lkeys, i) {
                        left_index.entry(key).or_default().push(i);
                    }
                }
                for j in 0..other.nrows() {
                    match row_key(&rkeys, j).and_then(|k| left_index.get(&k)) {
                        Some(ls) => pairs.extend(ls.iter().map(|&i| (Some(i), Some(j)))),
                        None => pairs.push((None, Some(j))),
                    }
                }
            }
            _ => {
                for i in 0..self.nrows() {
                    match row_key(&lkeys, i).and_then(|k| right_index.get(&k)) {
                        Some(rs) => {
                            for &j in rs {
                                right_matched[j] = true;
                                pairs.push((Some(i), Some(j)));
                            }
                        }
                        None if how != JoinHow::Inner => pairs.push((Some(i), None)),
                        None => {}
                    }
                }
                if how == JoinHow::Outer {
                    pairs.extend(
                        right_matched
                            .iter()
                            .enumerate()
                            .filter(|(_, m)| !**m)
                            .map(|(j, _)| (None, Some(j))),
                    );
                }
            }
        }

        // Right key columns that share a name with their left key merge
        // into the left column.
        let shared: HashMap<&str, &str> = left_on
            .iter()
            .zip(right_on)
            .filter(|(l, r)| l == r)
            .map(|(l, r)| (l.as_str(), r.as_str()))
            .collect();
        let left_names: HashSet<&str> = self.columns().iter().map(|c| c.name.as_str()).collect();
        let right_names: HashSet<&str> = other
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !shared.contains_key(n))
            .collect();

        let mut columns = Vec::new();
        for col in self.columns() {
            let rcol = shared.get(col.name.as_str()).and_then(|r| other.column(r));
            let values = pairs
                .iter()
                .map(|(l, r)| match (l, r, rcol) {
                    (Some(i), _, _) => col.values[*i].clone(),
                    (None, Some(j), Some(rc)) => rc.values[*j].clone(),
                    _ => Cell::Null,
                })
                .collect();
            let name = if rcol.is_none() && right_names.contains(col.name.as_str()) {
                format!("{}_x", col.name)
            } else {
                col.name.clone()
            };
            columns.push(Column::new(name, values));
        }
        for col in other.columns() {
            if shared.contains_key(col.name.as_str()) {
                continue;
            }
            let values = pairs
                .iter()
                .map(|(_, r)| r.map(|j| col.values[j].clone()).unwrap_or(Cell::Null))
                .collect();
            let name = if left_names.contains(col.name.as_str()) {
                format!("{}_y", col.name)
            } else {
                col.name.clone()
            };
            columns.push(Column::new(name, values));
        }
        Table::new(columns)
    }

    pub fn group_by(&self, keys: &[String]) -> Result<Grouped> {
        if keys.is_empty() {
            return Err(Error::Table("group_by needs at least one key".to_string()));
        }
        let key_cols = keys
            .iter()
            .map(|k| self.require(k))
            .collect::<Result<Vec<_>>>()?;

        let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
        for r in 0..self.nrows() {
            let cells: Vec<Cell> = key_cols.iter().map(|c| c.values[r].clone()).collect();
            let Some(key) = cells.iter().map(Cell::key).collect::<Option<Vec<_>>>() else {
                continue;
            };
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push((cells, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(r);
        }
        groups.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .map(|(x, y)| x.compare(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(Grouped {
            source: self.clone(),
            keys: keys.to_vec(),
            groups,
        })
    }

    /// Occurrences of each distinct non-null value, most frequent first.
    /// Equal counts keep first-seen order.
    pub fn value_counts(&self, column: &str) -> Result<Series> {
        let col = self.require(column)?;
        let mut order: Vec<Cell> = Vec::new();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for cell in col.non_null() {
            if let Some(key) = cell.key() {
                let n = counts.entry(key).or_insert(0);
                if *n == 0 {
                    order.push(cell.clone());
                }
                *n += 1;
            }
        }
        let mut pairs: Vec<(Cell, i64)> = order
            .into_iter()
            .map(|c| {
                let n = c.key().and_then(|k| counts.get(&k).copied()).unwrap_or(0);
                (c, n)
            })
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(Series {
            name: Some("count".to_string()),
            index: pairs.iter().map(|(c, _)| c.clone()).collect(),
            values: pairs.into_iter().map(|(_, n)| Cell::Int(n)).collect(),
        })
    }

    /// Distinct values of a column in first-seen order, nulls included once.
    pub fn unique(&self, column: &str) -> Result<Vec<Cell>> {
        let col = self.require(column)?;
        let mut seen: HashSet<Option<String>> = HashSet::new();
        Ok(col
            .values
            .iter()
            .filter(|c| seen.insert(c.key()))
            .cloned()
            .collect())
    }

    /// Drop duplicate rows, keeping the first occurrence.
    pub fn distinct(&self) -> Table {
        let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
        let rows: Vec<usize> = (0..self.nrows())
            .filter(|&r| seen.insert(self.row(r).iter().map(Cell::key).collect()))
            .collect();
        self.take_rows(&rows)
    }

    /// Drop rows with a null in any of `columns`, or in any column when
    /// `columns` is empty.
    pub fn drop_nulls(&self, columns: &[String]) -> Result<Table> {
        let checked: Vec<&Column> = if columns.is_empty() {
            self.columns().iter().collect()
        } else {
            columns
                .iter()
                .map(|c| self.require(c))
                .collect::<Result<Vec<_>>>()?
        };
        let mask: Vec<bool> = (0..self.nrows())
            .map(|r| checked.iter().all(|c| !c.values[r].is_null()))
            .collect();
        self.filter_mask(&mask)
    }

    pub fn rename(&self, mapping: &BTreeMap<String, String>) -> Result<Table> {
        for old in mapping.keys() {
            self.require(old)?;
        }
        Table::new(
            self.columns()
                .iter()
                .map(|c| Column {
                    name: mapping.get(&c.name).cloned().unwrap_or_else(|| c.name.clone()),
                    dtype: c.dtype,
                    values: c.values.clone(),
                })
                .collect(),
        )
    }

    /// Add a column, or replace the one with the same name in place.
    pub fn with_column(&self, name: &str, values: Vec<Cell>) -> Result<Table> {
        if self.ncols() > 0 && values.len() != self.nrows() {
            return Err(Error::Table(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.nrows()
            )));
        }
        let new_col = Column::new(name, values);
        let mut columns = self.columns().to_vec();
        match columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = new_col,
            None => columns.push(new_col),
        }
        Table::new(columns)
    }

    pub fn series(&self, column: &str) -> Result<Series> {
        Ok(Series::from_column(self.require(column)?))
    }

    /// Summary statistics of the numeric columns: a `stat` column
    /// (count, mean, std, min, max) followed by one column per input.
    pub fn describe(&self) -> Result<Table> {
        let stats = ["count", "mean", "std", "min", "max"];
        let mut columns = vec![Column::new(
            "stat",
            stats.iter().map(|s| Cell::from(*s)).collect(),
        )];
        for col in self.columns().iter().filter(|c| c.dtype.is_numeric()) {
            let nums = numeric(col.non_null())?;
            let n = nums.len() as f64;
            let values = if nums.is_empty() {
                vec![Cell::Float(0.0), Cell::Null, Cell::Null, Cell::Null, Cell::Null]
            } else {
                let mean = nums.iter().sum::<f64>() / n;
                let std = if nums.len() > 1 {
                    Cell::Float(
                        (nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt(),
                    )
                } else {
                    Cell::Null
                };
                let min = nums.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                vec![
                    Cell::Float(n),
                    Cell::Float(mean),
                    std,
                    Cell::Float(min),
                    Cell::Float(max),
                ]
            };
            columns.push(Column {
                name: col.name.clone(),
                dtype: DType::Float,
                values,
            });
        }
        Table::new(columns)
    }
}

impl Series {
    pub fn aggregate(&self, func: AggFn) -> Result<Cell> {
        func.apply(&self.values)
    }

    pub fn head(&self, n: usize) -> Series {
        let n = n.min(self.len());
        Series {
            name: self.name.clone(),
            index: self.index[..n].to_vec(),
            values: self.values[..n].to_vec(),
        }
    }

    /// Sort by value, nulls last.
    pub fn sort_values(&self, ascending: bool) -> Series {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (&self.values[a], &self.values[b]);
            match (x.is_null(), y.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                _ if ascending => x.compare(y),
                _ => y.compare(x),
            }
        });
        Series {
            name: self.name.clone(),
            index: order.iter().map(|&i| self.index[i].clone()).collect(),
            values: order.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Table {
        Table::from_csv_str(
            "order_id,customer_id,amount\n1,10,20.0\n2,11,5.5\n3,10,4.5\n4,12,\n",
        )
        .unwrap()
    }

    fn customers() -> Table {
        Table::from_csv_str("customer_id,name\n10,Ada\n11,Grace\n13,Linus\n").unwrap()
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_cmp_skips_nulls() {
        let t = orders().filter_cmp("amount", CmpOp::Gt, &Cell::Int(5)).unwrap();
        assert_eq!(t.nrows(), 2);
        let t = orders().filter_cmp("amount", CmpOp::Ne, &Cell::Int(5)).unwrap();
        assert_eq!(t.nrows(), 3);
    }

    #[test]
    fn test_sort_descending_nulls_last() {
        let t = orders().sort_by(&names(&["amount"]), false).unwrap();
        let ids: Vec<Cell> = t.column("order_id").unwrap().values.clone();
        assert_eq!(ids, vec![Cell::Int(1), Cell::Int(2), Cell::Int(3), Cell::Int(4)]);
        let t = orders().sort_by(&names(&["amount"]), true).unwrap();
        assert_eq!(t.column("order_id").unwrap().values[0], Cell::Int(3));
        assert_eq!(t.column("order_id").unwrap().values[3], Cell::Int(4));
    }

    #[test]
    fn test_inner_merge_on_shared_key() {
        let key = names(&["customer_id"]);
        let t = orders().merge(&customers(), &key, &key, JoinHow::Inner).unwrap();
        assert_eq!(t.column_names(), vec!["order_id", "customer_id", "amount", "name"]);
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.column("name").unwrap().values[1], Cell::from("Grace"));
    }

    #[test]
    fn test_left_and_outer_merge() {
        let key = names(&["customer_id"]);
        let left = orders().merge(&customers(), &key, &key, JoinHow::Left).unwrap();
        assert_eq!(left.nrows(), 4);
        assert!(left.column("name").unwrap().values[3].is_null());

        let outer = orders().merge(&customers(), &key, &key, JoinHow::Outer).unwrap();
        assert_eq!(outer.nrows(), 5);
        assert_eq!(outer.column("customer_id").unwrap().values[4], Cell::Int(13));
    }

    #[test]
    fn test_merge_suffixes_clashing_columns() {
        let a = Table::from_csv_str("id,v\n1,a\n").unwrap();
        let b = Table::from_csv_str("key,v\n1,b\n").unwrap();
        let t = a
            .merge(&b, &names(&["id"]), &names(&["key"]), JoinHow::Inner)
            .unwrap();
        assert_eq!(t.column_names(), vec!["id", "v_x", "key", "v_y"]);
    }

    #[test]
    fn test_group_by_sum_sorted_by_key() {
        let g = orders().group_by(&names(&["customer_id"])).unwrap();
        let t = g.agg_column("amount", AggFn::Sum).unwrap();
        assert_eq!(t.column("customer_id").unwrap().values, vec![
            Cell::Int(10),
            Cell::Int(11),
            Cell::Int(12)
        ]);
        assert_eq!(t.column("amount").unwrap().values[0], Cell::Float(24.5));
        assert_eq!(t.column("amount").unwrap().values[2], Cell::Int(0));

        let sizes = g.size().unwrap();
        assert_eq!(sizes.column("size").unwrap().values[0], Cell::Int(2));
    }

    #[test]
    fn test_int_sum_overflow_becomes_float() {
        assert_eq!(AggFn::Sum.apply(&[Cell::Int(2), Cell::Int(3)]).unwrap(), Cell::Int(5));
        let sum = AggFn::Sum.apply(&[Cell::Int(i64::MAX), Cell::Int(1)]).unwrap();
        assert_eq!(sum, Cell::Float(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn test_mean_of_strings_is_error() {
        let err = AggFn::Mean.apply(&[Cell::from("x")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_value_counts_most_frequent_first() {
        let s = orders().value_counts("customer_id").unwrap();
        assert_eq!(s.index[0], Cell::Int(10));
        assert_eq!(s.values[0], Cell::Int(2));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_drop_nulls_and_distinct() {
        assert_eq!(orders().drop_nulls(&[]).unwrap().nrows(), 3);
        let dup = Table::from_csv_str("a,b\n1,x\n1,x\n2,y\n").unwrap();
        assert_eq!(dup.distinct().nrows(), 2);
    }

    #[test]
    fn test_describe_numeric_only() {
        let d = orders().describe().unwrap();
        assert_eq!(d.column_names(), vec!["stat", "order_id", "customer_id", "amount"]);
        assert_eq!(d.column("amount").unwrap().values[0], Cell::Float(3.0));
    }

    #[test]
    fn test_with_column_replaces_in_place() {
        let t = orders()
            .with_column("customer_id", vec![Cell::Int(0); 4])
            .unwrap();
        assert_eq!(t.column_names()[1], "customer_id");
        assert_eq!(t.column("customer_id").unwrap().values[3], Cell::Int(0));
    }
}
