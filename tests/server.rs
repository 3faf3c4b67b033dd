//! HTTP API tests against a server bound to an ephemeral port.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use tabula::config::{parse_config, Config};
use tabula::embedding::HashEmbedder;
use tabula::llm::DisabledChat;
use tabula::sandbox::LuaSandbox;
use tabula::server::router;
use tabula::service::{Components, Tabula};
use tabula_core::rerank::PassthroughReranker;
use tabula_core::store::memory::InMemoryStore;

fn test_config(tmp: &TempDir) -> Config {
    parse_config(&format!(
        "[db]\npath = \"{}/tabula.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap()
}

async fn start_server(config: &Config) -> String {
    let service = Tabula::with_components(
        config,
        Components {
            store: Arc::new(InMemoryStore::new()),
            embedder: Arc::new(HashEmbedder::new(64)),
            reranker: Arc::new(PassthroughReranker),
            chat: Arc::new(DisabledChat),
            executor: Arc::new(LuaSandbox::new(&config.sandbox)),
        },
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(service));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_tables(tmp: &TempDir) -> Vec<String> {
    let orders = tmp.path().join("orders.csv");
    let customers = tmp.path().join("customers.csv");
    std::fs::write(&orders, "order_id,customer_id\n1,10\n2,11\n").unwrap();
    std::fs::write(&customers, "customer_id,name\n10,Ada\n11,Grace\n").unwrap();
    vec![
        orders.display().to_string(),
        customers.display().to_string(),
    ]
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ingest_list_and_delete() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tables/ingest", base))
        .json(&json!({"tenant_id": "u1", "source_id": "up", "paths": write_tables(&tmp)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["tables"][0]["status"], "indexed");
    assert_eq!(report["relationships"][0]["table_a"], "customers.csv");

    let rel: Value = client
        .get(format!("{}/tenants/u1/relationships", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rel["relationships"].as_array().unwrap().len(), 1);

    let contents: Value = client
        .get(format!("{}/tenants/u1/contents?type=table_columns", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(contents["count"], 2);

    let deleted: Value = client
        .delete(format!("{}/tenants/u1/sources/up", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], 4);

    let purged: Value = client
        .delete(format!("{}/tenants/u1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purged["deleted"], 0);
}

#[tokio::test]
async fn test_documents_endpoint_counts_chunks() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/documents", base))
        .json(&json!({
            "tenant_id": "u1",
            "source_id": "web",
            "text": "Scraped page about pricing.",
            "metadata": {"url": "https://example.com/pricing"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["count"], 1);
}

#[tokio::test]
async fn test_error_envelopes() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({"query": " ", "tenant_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({"query": "what changed?", "tenant_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "provider_error");
}

#[tokio::test]
async fn test_query_without_data_is_no_context() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({"query": "total revenue by region", "tenant_id": "nobody"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["route"], "no_context");
}

#[tokio::test]
async fn test_chat_stream_sends_error_event() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&test_config(&tmp)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat/stream", base))
        .json(&json!({"query": "anything", "tenant_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("event: error"));
    assert!(body.contains("chat provider is disabled"));
    assert!(!body.contains("event: done"));
}
