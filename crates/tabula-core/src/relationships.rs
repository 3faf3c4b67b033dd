//! Join discovery across tables.
//!
//! [`RelationshipDetector::detect`] compares every unordered pair of
//! distinct tables and proposes column pairs that look joinable.
//!
//! # Passes
//!
//! | Pass | Columns compared | Accepted when |
//! |------|------------------|---------------|
//! | 1 | same name on both sides | dtypes compatible and values overlap |
//! | 2 | different names that look related | dtypes compatible and values overlap |
//!
//! Pass 2 runs for a pair only when pass 1 found nothing for it. "Look
//! related" means, case-insensitively: one name contains the other, both
//! contain `id`, or one contains `customer` and the other `id`.
//!
//! Value overlap compares the sets of stringified non-null values, each
//! capped at `max_distinct_values` entries to bound cost on large
//! tables. The cap can hide overlaps that only occur deep in a column.
//!
//! Pairs are keyed `(a, b)` with `a < b`, so no reciprocal duplicates
//! exist. The result is persisted as a single chunk per tenant.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{kind, ChunkMetadata, Document};
use crate::table::{Column, Table};

/// Metadata key holding the serialized join list.
pub const JOIN_DATA_KEY: &str = "join_data";

/// Joinable column pairs between two tables, `table_a < table_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCandidate {
    pub table_a: String,
    pub table_b: String,
    /// `(column in table_a, column in table_b)`, never empty.
    pub column_pairs: Vec<(String, String)>,
}

/// Every discovered edge, keyed by canonical table pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipSet {
    edges: BTreeMap<(String, String), Vec<(String, String)>>,
}

impl RelationshipSet {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Column pairs for a table pair, in either order. Pairs are
    /// returned oriented as asked: `(column in first, column in second)`.
    pub fn get(&self, first: &str, second: &str) -> Option<Vec<(String, String)>> {
        if first <= second {
            self.edges
                .get(&(first.to_string(), second.to_string()))
                .cloned()
        } else {
            self.edges
                .get(&(second.to_string(), first.to_string()))
                .map(|pairs| pairs.iter().map(|(a, b)| (b.clone(), a.clone())).collect())
        }
    }

    pub fn candidates(&self) -> Vec<JoinCandidate> {
        self.edges
            .iter()
            .map(|((a, b), pairs)| JoinCandidate {
                table_a: a.clone(),
                table_b: b.clone(),
                column_pairs: pairs.clone(),
            })
            .collect()
    }

    pub fn from_candidates(candidates: Vec<JoinCandidate>) -> Self {
        let mut set = RelationshipSet::default();
        for c in candidates {
            if c.column_pairs.is_empty() || c.table_a == c.table_b {
                continue;
            }
            let (key, pairs) = if c.table_a <= c.table_b {
                ((c.table_a, c.table_b), c.column_pairs)
            } else {
                (
                    (c.table_b, c.table_a),
                    c.column_pairs.into_iter().map(|(a, b)| (b, a)).collect(),
                )
            };
            let entry = set.edges.entry(key).or_default();
            for pair in pairs {
                if !entry.contains(&pair) {
                    entry.push(pair);
                }
            }
        }
        set
    }

    /// Human-readable summary used in prompts.
    pub fn summary_text(&self) -> String {
        let mut text = String::from("Table relationship summary:\n");
        for ((a, b), pairs) in &self.edges {
            text.push_str(&format!("\n{} can be joined with {} on:\n", a, b));
            for (ca, cb) in pairs {
                text.push_str(&format!("  - {}.{} = {}.{}\n", a, ca, b, cb));
            }
        }
        text
    }

    /// The single relationship chunk for `tenant_id`. Join data is kept
    /// as a JSON string so any store backend can hold it.
    pub fn to_document(&self, tenant_id: &str) -> Result<Document> {
        let join_data = serde_json::to_string(&self.candidates())?;
        Ok(Document::new(
            self.summary_text(),
            ChunkMetadata::for_tenant(tenant_id)
                .with_kind(kind::TABLE_RELATIONSHIPS)
                .with_extra(JOIN_DATA_KEY, join_data),
        ))
    }

    /// Parse the join data of a relationship chunk. Missing or malformed
    /// data yields `None`.
    pub fn from_metadata(meta: &ChunkMetadata) -> Option<Self> {
        let raw = meta.extra_str(JOIN_DATA_KEY)?;
        let candidates: Vec<JoinCandidate> = serde_json::from_str(raw).ok()?;
        Some(Self::from_candidates(candidates))
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipDetector {
    /// Per-column cap on the distinct values compared for overlap.
    pub max_distinct_values: usize,
}

impl Default for RelationshipDetector {
    fn default() -> Self {
        Self {
            max_distinct_values: 10_000,
        }
    }
}

impl RelationshipDetector {
    pub fn new(max_distinct_values: usize) -> Self {
        Self {
            max_distinct_values: max_distinct_values.max(1),
        }
    }

    pub fn detect(&self, tables: &BTreeMap<String, Table>) -> RelationshipSet {
        let mut values = ValueCache::new(self.max_distinct_values);
        let mut set = RelationshipSet::default();
        let names: Vec<&String> = tables.keys().collect();

        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                let pairs = self.detect_pair(a, &tables[*a], b, &tables[*b], &mut values);
                if pairs.is_empty() {
                    continue;
                }
                tracing::debug!(table_a = %a, table_b = %b, joins = pairs.len(), "join candidates found");
                set.edges.insert(((*a).clone(), (*b).clone()), pairs);
            }
        }
        set
    }

    fn detect_pair(
        &self,
        name_a: &str,
        a: &Table,
        name_b: &str,
        b: &Table,
        values: &mut ValueCache,
    ) -> Vec<(String, String)> {
        let mut pairs = Vec::new();

        for ca in a.columns() {
            if let Some(cb) = b.column(&ca.name) {
                if ca.dtype.compatible_with(cb.dtype) && values.overlap(name_a, ca, name_b, cb) {
                    pairs.push((ca.name.clone(), cb.name.clone()));
                }
            }
        }
        if !pairs.is_empty() {
            return pairs;
        }

        for ca in a.columns() {
            for cb in b.columns() {
                if ca.name == cb.name || !names_look_related(&ca.name, &cb.name) {
                    continue;
                }
                if ca.dtype.compatible_with(cb.dtype) && values.overlap(name_a, ca, name_b, cb) {
                    pairs.push((ca.name.clone(), cb.name.clone()));
                }
            }
        }
        pairs
    }
}

/// Case-insensitive name heuristic for cross-name joins.
pub fn names_look_related(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a.contains(&b)
        || b.contains(&a)
        || (a.contains("id") && b.contains("id"))
        || (a.contains("customer") && b.contains("id"))
        || (b.contains("customer") && a.contains("id"))
}

/// Memoised capped value sets, one per (table, column).
struct ValueCache {
    cap: usize,
    sets: HashMap<(String, String), HashSet<String>>,
}

impl ValueCache {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            sets: HashMap::new(),
        }
    }

    fn ensure(&mut self, table: &str, column: &Column) {
        let key = (table.to_string(), column.name.clone());
        if !self.sets.contains_key(&key) {
            let set = column.distinct_keys(self.cap).into_iter().collect();
            self.sets.insert(key, set);
        }
    }

    fn overlap(&mut self, ta: &str, ca: &Column, tb: &str, cb: &Column) -> bool {
        self.ensure(ta, ca);
        self.ensure(tb, cb);
        let sa = &self.sets[&(ta.to_string(), ca.name.clone())];
        let sb = &self.sets[&(tb.to_string(), cb.name.clone())];
        let (small, large) = if sa.len() <= sb.len() { (sa, sb) } else { (sb, sa) };
        small.iter().any(|v| large.contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(specs: &[(&str, &str)]) -> BTreeMap<String, Table> {
        specs
            .iter()
            .map(|(name, csv)| (name.to_string(), Table::from_csv_str(csv).unwrap()))
            .collect()
    }

    fn orders_and_customers() -> BTreeMap<String, Table> {
        tables(&[
            ("orders.csv", "order_id,customer_id,amount\n1,10,5.0\n2,11,7.5\n3,10,1.0\n"),
            ("customers.csv", "customer_id,name\n10,Ada\n11,Grace\n"),
        ])
    }

    #[test]
    fn test_shared_customer_id_is_joinable() {
        let set = RelationshipDetector::default().detect(&orders_and_customers());
        assert_eq!(set.len(), 1);
        let c = &set.candidates()[0];
        assert_eq!(c.table_a, "customers.csv");
        assert_eq!(c.table_b, "orders.csv");
        assert_eq!(c.column_pairs, vec![("customer_id".to_string(), "customer_id".to_string())]);
    }

    #[test]
    fn test_lookup_is_symmetric() {
        let set = RelationshipDetector::default().detect(&orders_and_customers());
        let forward = set.get("customers.csv", "orders.csv").unwrap();
        let backward = set.get("orders.csv", "customers.csv").unwrap();
        assert_eq!(forward.len(), backward.len());
        assert_eq!(forward[0].0, backward[0].1);
    }

    #[test]
    fn test_no_overlap_no_name_similarity_means_no_edge() {
        let t = tables(&[
            ("a.csv", "colour,weight\nred,1\nblue,2\n"),
            ("b.csv", "city,population\nOslo,7\nLima,9\n"),
        ]);
        assert!(RelationshipDetector::default().detect(&t).is_empty());
    }

    #[test]
    fn test_same_name_without_overlap_is_rejected() {
        let t = tables(&[
            ("a.csv", "code\nx1\nx2\n"),
            ("b.csv", "code\ny1\ny2\n"),
        ]);
        assert!(RelationshipDetector::default().detect(&t).is_empty());
    }

    #[test]
    fn test_incompatible_types_rejected() {
        let t = tables(&[
            ("a.csv", "customer_id\n1\n2\n"),
            ("b.csv", "customer_id\n1\nabc\n"),
        ]);
        assert!(RelationshipDetector::default().detect(&t).is_empty());
    }

    #[test]
    fn test_heuristic_pass_finds_differently_named_keys() {
        let t = tables(&[
            ("orders.csv", "order_id,cust_id\n1,10\n2,11\n"),
            ("people.csv", "customer,name\n10,Ada\n12,Bob\n"),
        ]);
        let set = RelationshipDetector::default().detect(&t);
        let pairs = set.get("orders.csv", "people.csv").unwrap();
        assert!(pairs.contains(&("cust_id".to_string(), "customer".to_string())));
    }

    #[test]
    fn test_heuristic_pass_skipped_when_exact_match_found() {
        let t = tables(&[
            ("a.csv", "id,user_id\n1,1\n2,2\n"),
            ("b.csv", "id,owner_id\n1,1\n3,2\n"),
        ]);
        let set = RelationshipDetector::default().detect(&t);
        assert_eq!(set.get("a.csv", "b.csv").unwrap(), vec![("id".to_string(), "id".to_string())]);
    }

    #[test]
    fn test_sampling_cap_limits_overlap_check() {
        let t = tables(&[
            ("a.csv", "key\n1\n2\n3\n"),
            ("b.csv", "key\n9\n8\n3\n"),
        ]);
        assert!(RelationshipDetector::new(2).detect(&t).is_empty());
        assert!(!RelationshipDetector::new(3).detect(&t).is_empty());
    }

    #[test]
    fn test_document_round_trip() {
        let set = RelationshipDetector::default().detect(&orders_and_customers());
        let doc = set.to_document("u1").unwrap();
        assert_eq!(doc.metadata.kind.as_deref(), Some(kind::TABLE_RELATIONSHIPS));
        assert_eq!(doc.metadata.tenant_id, "u1");
        assert!(doc
            .text
            .contains("customers.csv.customer_id = orders.csv.customer_id"));
        assert_eq!(RelationshipSet::from_metadata(&doc.metadata), Some(set));
    }

    #[test]
    fn test_name_heuristic() {
        assert!(names_look_related("CustomerID", "cust_id"));
        assert!(names_look_related("customer", "id"));
        assert!(names_look_related("region", "sales_region"));
        assert!(!names_look_related("colour", "weight"));
    }
}
