//! Prompt templates.

use crate::llm::{ChatMessage, Role};
use crate::profile::TableProfile;

const SAMPLE_DATA_CHARS: usize = 300;
const DESCRIPTION_SAMPLE_CHARS: usize = 500;

/// Reference card for the analysis API available to generated snippets.
pub const ANALYSIS_API: &str = r#"Analysis API (Lua 5.4):
- read_csv(path) -> DataFrame; DataFrame.new({col = {values...}, ...}); DataFrame.from_records({{col = v}, ...})
- df:nrows(), df:ncols(), df:columns(), df:shape(), df:head(n), df:tail(n)
- df:select({"a", "b"}), df:filter(function(row) return row.amount > 10 end), df:where("col", ">", value)
- df:sort("col", ascending), df:sort({"a", "b"}, false)
- df:merge(other, {on = "key"}), df:merge(other, {left_on = "a", right_on = "b", how = "left"})
- df:groupby("key") or df:groupby({"a", "b"}) then :count(), :size(), :sum("col"), :mean("col"), :min("col"), :max("col"), :nunique("col"), :agg({total = {"col", "sum"}})
- df:value_counts("col"), df:column("col") -> Series, df:unique("col"), df:nunique("col")
- df:sum("col"), df:mean("col"), df:min("col"), df:max("col"), df:count("col")
- df:rename({old = "new"}), df:mutate("new_col", function(row) return row.a * 2 end), df:drop_nulls(), df:distinct()
- df:rows() -> list of row tables, df:row(i), df:describe()
- Series: s:sum(), s:mean(), s:min(), s:max(), s:count(), s:unique(), s:values(), s:get(label), s:sort(asc), s:head(n), s:to_frame()
No other libraries are available. Do not use require, io or os."#;

/// Asks the model for a JSON object the structured parser understands.
pub const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object and nothing else, using exactly these keys:
{"analysis": "how the question relates to the data", "code": "complete Lua code; wrap each alternative approach in <CODE_BLOCK> and </CODE_BLOCK>", "explanation": "what the code does and why it answers the question"}"#;

/// Describe each retrieved table: how to reference it, its shape, its
/// columns and a short data sample.
pub fn format_table_info(profiles: &[TableProfile]) -> String {
    let mut info = String::new();
    for (i, p) in profiles.iter().enumerate() {
        let var = p.variable_name();
        let sample: String = p.sample_rows_text.chars().take(SAMPLE_DATA_CHARS).collect();
        info.push_str(&format!("\n--- Table {}: {} ---\n", i + 1, p.filename));
        info.push_str(&format!("Variable name to use: {}\n", var));
        info.push_str(&format!("Code to load: {} = read_csv(\"{}\")\n", var, p.filepath));
        info.push_str(&format!("Description: {}\n", p.description));
        info.push_str(&format!("Rows: {}, Columns: {}\n", p.row_count, p.column_count));
        info.push_str("Columns:\n");
        info.push_str(&p.columns_text(3));
        info.push_str(&format!("\nSample Data:\n{}...\n", sample));
    }
    info
}

const SHARED_RULES: &str = r#"1. Your code must be complete and ready to execute.
2. Each table is already loaded into a variable named after its file (see "Variable name to use").
3. Store the final answer in a global variable called `result`.
4. Add short comments explaining each step.
5. Do not produce charts or plots.
6. To offer several approaches, wrap each complete snippet in <CODE_BLOCK> and </CODE_BLOCK> tags, for example:

   <CODE_BLOCK>
   -- Approach 1: group and count
   result = orders:groupby("customer_id"):count()
   </CODE_BLOCK>"#;

pub fn regular_query_prompt(table_info: &str, query: &str) -> String {
    format!(
        "You are a data analysis expert. Given the following tables and a user question, \
write clean, efficient analysis code that answers the question.\n\n\
Available tables:\n{table_info}\n\nUser question:\n{query}\n\n\
Important instructions:\n{SHARED_RULES}\n\n{ANALYSIS_API}\n\n{FORMAT_INSTRUCTIONS}\n"
    )
}

pub fn relational_query_prompt(table_info: &str, relationship_text: &str, query: &str) -> String {
    format!(
        "You are a data relationship expert. Given the following tables and how they relate, \
write analysis code that answers the user's question, joining tables where needed.\n\n\
Available tables:\n{table_info}\n\nRelationship information:\n{relationship_text}\n\n\
User question:\n{query}\n\n\
Important instructions:\n{SHARED_RULES}\n7. Join tables with df:merge on the listed columns.\n\n\
{ANALYSIS_API}\n\n{FORMAT_INSTRUCTIONS}\n"
    )
}

pub fn description_prompt(profile: &TableProfile) -> String {
    let sample: String = profile
        .sample_rows_text
        .chars()
        .take(DESCRIPTION_SAMPLE_CHARS)
        .collect();
    format!(
        "You are a data analyst. Given the following metadata about a table, give a clear and \
concise description of what the data represents and what questions it could answer.\n\n\
Table metadata:\nFilename: {}\nNumber of rows: {}\nNumber of columns: {}\n\nColumns:\n{}\n\n\
Sample data:\n{}\n\nReply with the description only.",
        profile.filename,
        profile.row_count,
        profile.column_count,
        profile.columns_text(3),
        sample
    )
}

pub fn conversational_prompt(query: &str) -> String {
    format!(
        "You are a helpful data assistant that analyses uploaded tables.\n\
The user sent a conversational message: \"{query}\"\n\n\
Reply in a friendly, concise way. If they greet you, greet them back and mention you can \
analyse their data. If they ask what you can do, explain your table analysis capabilities. \
Keep the reply under 3 sentences."
    )
}

/// Document question answering over retrieved passages and the recent
/// conversation.
pub fn answer_prompt(query: &str, context: &[String], history: &[ChatMessage]) -> String {
    let context_text = if context.is_empty() {
        "No relevant documents were found.".to_string()
    } else {
        context
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let history_text = history
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            format!("{}: {}", who, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a helpful assistant answering questions about the user's documents.\n\
Use the context below when it is relevant. If the context does not contain the answer, \
say so briefly and answer from general knowledge.\n\n\
Context:\n{context_text}\n\nConversation so far:\n{history_text}\n\n\
Question: {query}\n\nStart your reply with \"ANSWER: \"."
    )
}
