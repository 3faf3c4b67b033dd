//! Execution outcomes and their rendering.
//!
//! A snippet's result is captured as a [`ResultValue`] and rendered by
//! shape into a [`Rendered`] payload that clients can display directly:
//!
//! | Shape | `type` | Payload |
//! |-------|--------|---------|
//! | table | `dataframe` | records, column names, `[rows, cols]` |
//! | series | `series` | index label → value |
//! | list / map | `collection` | the JSON value |
//! | anything else | `other` | its string form |

use serde::Serialize;

use crate::table::{Series, Table};

/// Message used when a snippet ran cleanly but left nothing to report.
pub const NO_RESULT_MESSAGE: &str = "Code executed successfully, but no result was produced";

/// A value produced by a snippet.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Table(Table),
    Series(Series),
    /// A list or map.
    Collection(serde_json::Value),
    /// A number, boolean or null.
    Scalar(serde_json::Value),
    Text(String),
}

impl ResultValue {
    pub fn render(&self) -> Rendered {
        match self {
            ResultValue::Table(t) => Rendered::Dataframe {
                data: t.to_records(),
                columns: t.column_names(),
                shape: [t.nrows(), t.ncols()],
            },
            ResultValue::Series(s) => Rendered::Series { data: s.to_map() },
            ResultValue::Collection(v) => Rendered::Collection { data: v.clone() },
            ResultValue::Scalar(v) => Rendered::Other {
                data: match v {
                    serde_json::Value::Null => "None".to_string(),
                    other => other.to_string(),
                },
            },
            ResultValue::Text(s) => Rendered::Other { data: s.clone() },
        }
    }
}

/// Display-ready form of a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Rendered {
    Dataframe {
        data: Vec<serde_json::Map<String, serde_json::Value>>,
        columns: Vec<String>,
        shape: [usize; 2],
    },
    Series {
        data: serde_json::Map<String, serde_json::Value>,
    },
    Collection {
        data: serde_json::Value,
    },
    Other {
        data: String,
    },
    Error {
        message: String,
    },
}

/// What happened when one snippet ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success {
        #[serde(skip)]
        value: Option<ResultValue>,
        rendered: Rendered,
    },
    Failure {
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn success(value: ResultValue) -> Self {
        let rendered = value.render();
        ExecutionOutcome::Success {
            value: Some(value),
            rendered,
        }
    }

    /// Success with nothing to report.
    pub fn no_result() -> Self {
        ExecutionOutcome::Success {
            value: None,
            rendered: Rendered::Other {
                data: NO_RESULT_MESSAGE.to_string(),
            },
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&ResultValue> {
        match self {
            ExecutionOutcome::Success { value, .. } => value.as_ref(),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    /// Rendered payload, with failures rendered as `error`.
    pub fn rendered(&self) -> Rendered {
        match self {
            ExecutionOutcome::Success { rendered, .. } => rendered.clone(),
            ExecutionOutcome::Failure { message } => Rendered::Error {
                message: message.clone(),
            },
        }
    }

    /// Short plain-text form for prompts and logs.
    pub fn summary(&self, max_rows: usize) -> String {
        match self {
            ExecutionOutcome::Failure { message } => format!("Error: {}", message),
            ExecutionOutcome::Success { value: None, rendered } => match rendered {
                Rendered::Other { data } => data.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            },
            ExecutionOutcome::Success {
                value: Some(v), ..
            } => match v {
                ResultValue::Table(t) => t.to_text(max_rows),
                ResultValue::Series(s) => s
                    .index
                    .iter()
                    .zip(&s.values)
                    .take(max_rows)
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join("\n"),
                ResultValue::Collection(j) | ResultValue::Scalar(j) => j.to_string(),
                ResultValue::Text(s) => s.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    #[test]
    fn test_table_renders_records_and_shape() {
        let t = Table::from_csv_str("a,b\n1,x\n2,y\n").unwrap();
        let json = serde_json::to_value(ExecutionOutcome::success(ResultValue::Table(t))).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["rendered"]["type"], "dataframe");
        assert_eq!(json["rendered"]["shape"], serde_json::json!([2, 2]));
        assert_eq!(json["rendered"]["columns"], serde_json::json!(["a", "b"]));
        assert_eq!(json["rendered"]["data"][1]["b"], "y");
    }

    #[test]
    fn test_series_renders_label_map() {
        let s = Series {
            name: None,
            index: vec![Cell::from("north"), Cell::from("south")],
            values: vec![Cell::Int(3), Cell::Float(1.5)],
        };
        match ResultValue::Series(s).render() {
            Rendered::Series { data } => {
                assert_eq!(data["north"], 3);
                assert_eq!(data["south"], 1.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scalar_and_text_render_as_other() {
        assert_eq!(
            ResultValue::Scalar(serde_json::json!(42)).render(),
            Rendered::Other { data: "42".into() }
        );
        assert_eq!(
            ResultValue::Text("done".into()).render(),
            Rendered::Other { data: "done".into() }
        );
    }

    #[test]
    fn test_no_result_is_success_with_message() {
        let o = ExecutionOutcome::no_result();
        assert!(o.is_success());
        assert_eq!(o.summary(5), NO_RESULT_MESSAGE);
    }

    #[test]
    fn test_failure_renders_error() {
        let o = ExecutionOutcome::failure("boom");
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["message"], "boom");
        assert_eq!(o.rendered(), Rendered::Error { message: "boom".into() });
    }
}
