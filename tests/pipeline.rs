//! End-to-end tests of the service with in-process fake providers: an
//! in-memory store, the feature-hashing embedder, a keyword re-ranker and
//! a scripted chat model.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use tabula::config::{parse_config, Config};
use tabula::embedding::HashEmbedder;
use tabula::ingest::IngestStatus;
use tabula::sandbox::LuaSandbox;
use tabula::service::{Components, Tabula};
use tabula::stream::StreamEvent;
use tabula_core::error::{Error, Result};
use tabula_core::llm::{ChatModel, CompletionRequest, TokenSink};
use tabula_core::models::{kind, MetadataFilter, RouteKind};
use tabula_core::rerank::Reranker;
use tabula_core::store::memory::InMemoryStore;

const ORDERS: &str = "order_id,customer_id,amount\n1,10,5.0\n2,11,7.5\n3,10,12.0\n";
const CUSTOMERS: &str = "customer_id,name\n10,Ada\n11,Grace\n";

/// Answers by prompt type; records every prompt it sees.
struct ScriptedChat {
    code_response: String,
    fail_answers: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(code_response: String) -> Self {
        Self {
            code_response,
            fail_answers: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn reply(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("Respond with a single JSON object") {
            Ok(self.code_response.clone())
        } else if prompt.contains("Table metadata:") {
            Ok("Orders placed by customers.".to_string())
        } else if prompt.contains("ANSWER: ") {
            if self.fail_answers {
                Err(Error::Provider("chat endpoint unreachable".into()))
            } else {
                Ok("ANSWER: Revenue grew in the third quarter.".to_string())
            }
        } else {
            Ok("Hi there!".to_string())
        }
    }

    fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.reply(request.last_user_text())
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn TokenSink,
    ) -> Result<String> {
        let text = self.reply(request.last_user_text())?;
        for word in text.split_inclusive(' ') {
            if !sink.push(word).await {
                break;
            }
        }
        Ok(text)
    }
}

/// Scores a candidate by how many query words it contains.
struct KeywordReranker;

#[async_trait]
impl Reranker for KeywordReranker {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        Ok(candidates
            .iter()
            .map(|c| {
                let c = c.to_lowercase();
                words.iter().filter(|w| c.contains(w.as_str())).count() as f32
            })
            .collect())
    }
}

struct BrokenReranker;

#[async_trait]
impl Reranker for BrokenReranker {
    fn name(&self) -> &str {
        "broken"
    }

    async fn score(&self, _query: &str, _candidates: &[String]) -> Result<Vec<f32>> {
        Err(Error::Provider("scorer offline".into()))
    }
}

fn test_config(tmp: &TempDir) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "{}/tabula.sqlite"

[chunking]
chunk_size = 200
chunk_overlap = 40

[sandbox]
data_root = "{}"
timeout_secs = 5

[server]
stream_buffer = 2
"#,
        tmp.path().display(),
        tmp.path().display()
    ))
    .unwrap()
}

fn service(config: &Config, chat: Arc<ScriptedChat>, reranker: Arc<dyn Reranker>) -> Tabula {
    Tabula::with_components(
        config,
        Components {
            store: Arc::new(InMemoryStore::new()),
            embedder: Arc::new(HashEmbedder::new(128)),
            reranker,
            chat,
            executor: Arc::new(LuaSandbox::new(&config.sandbox)),
        },
    )
}

fn write_tables(tmp: &TempDir) -> Vec<PathBuf> {
    let orders = tmp.path().join("orders.csv");
    let customers = tmp.path().join("customers.csv");
    std::fs::write(&orders, ORDERS).unwrap();
    std::fs::write(&customers, CUSTOMERS).unwrap();
    vec![orders, customers]
}

fn join_and_count_response() -> String {
    let code = "<CODE_BLOCK>\n\
local o = read_csv(\"orders.csv\")\n\
local joined = o:merge(customers, {on = \"customer_id\"})\n\
result = joined:groupby(\"customer_id\"):agg({n_orders = {\"order_id\", \"count\"}})\n\
</CODE_BLOCK>\n\
<CODE_BLOCK>\n\
error(\"boom\")\n\
</CODE_BLOCK>";
    json!({
        "analysis": "Orders reference customers by customer_id.",
        "code": code,
        "explanation": "Joins orders to customers and counts orders per customer."
    })
    .to_string()
}

#[tokio::test]
async fn test_relational_query_joins_and_counts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(join_and_count_response()));
    let svc = service(&config, chat.clone(), Arc::new(KeywordReranker));

    let report = svc
        .ingest_tables(&write_tables(&tmp), "u1", "upload-1", false)
        .await
        .unwrap();
    assert_eq!(report.count(IngestStatus::Indexed), 2);
    assert_eq!(report.relationships.len(), 1);
    assert_eq!(report.relationships[0].table_a, "customers.csv");
    assert_eq!(report.relationships[0].table_b, "orders.csv");

    let result = svc
        .submit_query("how many orders per customer", "u1", None)
        .await
        .unwrap();
    assert_eq!(result.route, RouteKind::RelationalQuery);
    assert_eq!(
        result.answer_text,
        "Joins orders to customers and counts orders per customer."
    );
    assert_eq!(result.code_candidates.len(), 2);
    assert_eq!(result.execution_results.len(), 2);

    let first = serde_json::to_value(&result.execution_results[0]).unwrap();
    assert_eq!(first["status"], "success");
    assert_eq!(first["rendered"]["type"], "dataframe");
    assert_eq!(first["rendered"]["columns"], json!(["customer_id", "n_orders"]));
    assert_eq!(
        first["rendered"]["data"],
        json!([{"customer_id": 10, "n_orders": 2}, {"customer_id": 11, "n_orders": 1}])
    );

    let second = serde_json::to_value(&result.execution_results[1]).unwrap();
    assert_eq!(second["status"], "failure");
    assert!(second["message"].as_str().unwrap().contains("boom"));

    let relational = chat.prompts_containing("Relationship information:");
    assert_eq!(relational.len(), 1);
    assert!(relational[0].contains("customer_id"));
}

#[tokio::test]
async fn test_conversational_query_skips_retrieval() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(join_and_count_response()));
    let svc = service(&config, chat.clone(), Arc::new(KeywordReranker));
    svc.ingest_tables(&write_tables(&tmp), "u1", "upload-1", false)
        .await
        .unwrap();

    let result = svc.submit_query("hello", "u1", None).await.unwrap();
    assert_eq!(result.route, RouteKind::Conversational);
    assert_eq!(result.answer_text, "Hi there!");
    assert!(result.code_candidates.is_empty());
    assert!(chat.prompts_containing("Respond with a single JSON object").is_empty());
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(join_and_count_response()));
    let svc = service(&config, chat, Arc::new(KeywordReranker));
    svc.ingest_tables(&write_tables(&tmp), "u1", "upload-1", false)
        .await
        .unwrap();
    svc.ingest_text("Tenant one private notes about revenue.", "u1", "notes", Default::default())
        .await
        .unwrap();

    let result = svc.submit_query("orders per customer", "u2", None).await.unwrap();
    assert_eq!(result.route, RouteKind::NoContext);
    assert!(result.execution_results.is_empty());

    let answer = svc.answer("revenue", "u2", None, &[]).await.unwrap();
    assert!(answer.context.is_empty());
    assert!(svc
        .fetch_contents(&MetadataFilter::tenant("u2"))
        .await
        .unwrap()
        .is_empty());
    assert!(svc.relationships("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_source_filter_limits_query_tables() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let response = json!({
        "code": "result = orders:nrows()",
        "explanation": "Counts the orders."
    })
    .to_string();
    let chat = Arc::new(ScriptedChat::new(response));
    let svc = service(&config, chat, Arc::new(KeywordReranker));
    let paths = write_tables(&tmp);
    svc.ingest_tables(&paths[..1], "u1", "a", false).await.unwrap();
    svc.ingest_tables(&paths[1..], "u1", "b", false).await.unwrap();

    let only_a = ["a".to_string()].into();
    let result = svc
        .submit_query("how many orders", "u1", Some(&only_a))
        .await
        .unwrap();
    assert_eq!(result.sources, vec!["orders.csv"]);
    assert_eq!(result.route, RouteKind::RegularQuery);
    let outcome = serde_json::to_value(&result.execution_results[0]).unwrap();
    assert_eq!(outcome["rendered"], json!({"type": "other", "data": "3"}));
}

#[tokio::test]
async fn test_force_reindex_replaces_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(join_and_count_response()));
    let svc = service(&config, chat, Arc::new(KeywordReranker));
    let paths = write_tables(&tmp);
    svc.ingest_tables(&paths, "u1", "s", false).await.unwrap();

    let key = MetadataFilter::tenant("u1").with_source("s").with_filename("orders.csv");
    let before = svc.fetch_contents(&key).await.unwrap();

    let again = svc.ingest_tables(&paths, "u1", "s", false).await.unwrap();
    assert_eq!(again.count(IngestStatus::Skipped), 2);
    assert_eq!(svc.fetch_contents(&key).await.unwrap(), before);

    let forced = svc.ingest_tables(&paths[..1], "u1", "s", true).await.unwrap();
    assert_eq!(forced.tables[0].status, IngestStatus::Reindexed);
    let after = svc.fetch_contents(&key).await.unwrap();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|c| before.iter().all(|b| b.id != c.id)));
}

#[tokio::test]
async fn test_answer_uses_text_context() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(String::new()));
    let svc = service(&config, chat.clone(), Arc::new(KeywordReranker));
    svc.ingest_text(
        "The quarterly report says revenue grew by twelve percent.",
        "u1",
        "reports",
        Default::default(),
    )
    .await
    .unwrap();

    let answer = svc.answer("what happened to revenue", "u1", None, &[]).await.unwrap();
    assert_eq!(answer.answer, "Revenue grew in the third quarter.");
    assert_eq!(answer.context.len(), 1);
    let prompts = chat.prompts_containing("twelve percent");
    assert_eq!(prompts.len(), 1);
}

#[tokio::test]
async fn test_answer_falls_back_when_reranker_fails() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(String::new()));
    let svc = service(&config, chat, Arc::new(BrokenReranker));
    svc.ingest_text("Churn fell after the pricing change.", "u1", "notes", Default::default())
        .await
        .unwrap();

    let answer = svc.answer("churn", "u1", None, &[]).await.unwrap();
    assert_eq!(answer.context.len(), 1);
    assert_eq!(answer.context[0].score, answer.context[0].similarity);
}

#[tokio::test]
async fn test_answer_stream_ends_with_done() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(String::new()));
    let svc = service(&config, chat, Arc::new(KeywordReranker));

    let mut rx = svc.answer_stream("revenue", "u1", None, &[]).await;
    let mut text = String::new();
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Token { text: t } => text.push_str(&t),
            other => {
                terminal = Some(other);
                break;
            }
        }
    }
    assert_eq!(text, "ANSWER: Revenue grew in the third quarter.");
    match terminal {
        Some(StreamEvent::Done { result_id }) => assert!(!result_id.is_empty()),
        other => panic!("expected done, got {:?}", other),
    }
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_answer_stream_reports_provider_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let mut chat = ScriptedChat::new(String::new());
    chat.fail_answers = true;
    let svc = service(&config, Arc::new(chat), Arc::new(KeywordReranker));

    let mut rx = svc.answer_stream("revenue", "u1", None, &[]).await;
    let first = rx.recv().await.unwrap();
    match first {
        StreamEvent::Error { message } => assert!(message.contains("unreachable")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_purge_and_delete_source() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let chat = Arc::new(ScriptedChat::new(String::new()));
    let svc = service(&config, chat, Arc::new(KeywordReranker));
    let paths = write_tables(&tmp);
    svc.ingest_tables(&paths[..1], "u1", "a", false).await.unwrap();
    svc.ingest_tables(&paths[1..], "u1", "b", false).await.unwrap();
    svc.ingest_tables(&paths, "u2", "a", false).await.unwrap();
    assert_eq!(svc.relationships("u1").await.unwrap().len(), 1);

    assert_eq!(svc.delete_source("u1", "b").await.unwrap(), 2);
    assert!(svc.relationships("u1").await.unwrap().is_empty());

    let listing = svc.fetch_contents(&MetadataFilter::tenant("u1")).await.unwrap();
    assert_eq!(listing.len(), 2);
    assert!(listing
        .iter()
        .all(|c| c.metadata.kind.as_deref() != Some(kind::TABLE_RELATIONSHIPS)));

    assert_eq!(svc.purge_tenant("u1").await.unwrap(), 2);
    assert_eq!(svc.purge_tenant("u1").await.unwrap(), 0);
    assert_eq!(svc.fetch_contents(&MetadataFilter::tenant("u2")).await.unwrap().len(), 5);
}
