//! End-to-end orchestration tests.
//!
//! The real service is assembled from scripted providers, a recording
//! relational store, and an in-memory content index, then whole
//! questions are driven through `ChatService::query`. These tests pin
//! the cross-module behavior: path selection, the silent SQL fallback,
//! owner scoping of executed statements, cache gating, and the privacy
//! routing guarantees.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use query_harness::cache::{CacheService, MemoryStore};
use query_harness::chat::{ChatService, QueryRequest};
use query_harness::config::{CacheConfig, ContextConfig, RetrievalConfig};
use query_harness::context::ContextBuilder;
use query_harness::embedding::Embedder;
use query_harness::error::{EmbeddingError, ExecutionError, ProviderError};
use query_harness::executor::{RawQueryOutput, RelationalStore, SqlExecutor};
use query_harness::models::{
    ChatMessage, ContentKind, GenerationOutput, IndexedContent, Sensitivity,
};
use query_harness::providers::InferenceProvider;
use query_harness::retrieval::{MemoryIndex, RetrievalService};
use query_harness::router::InferenceRouter;
use query_harness::validator::SqlValidator;

// ─── Doubles ────────────────────────────────────────────────────────

/// Provider that replays a fixed script, one response per call. Running
/// past the script is a request failure, which keeps call counts honest.
struct ScriptedProvider {
    name: &'static str,
    local: bool,
    script: Mutex<VecDeque<&'static str>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(name: &'static str, local: bool, responses: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            local,
            script: Mutex::new(responses.iter().copied().collect()),
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        _prompt: &str,
        _system: Option<&str>,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(GenerationOutput {
                text: text.to_string(),
                model: "scripted-model".to_string(),
                provider: self.name.to_string(),
                tokens_used: Some(12),
                duration_ms: 1,
            }),
            None => Err(ProviderError::RequestFailed {
                provider: self.name.to_string(),
                reason: "script exhausted".to_string(),
            }),
        }
    }
}

/// Relational store that records every statement it receives and
/// replays a fixed result.
struct RecordingStore {
    statements: Mutex<Vec<String>>,
    output: RawQueryOutput,
}

impl RecordingStore {
    fn new(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> Arc<Self> {
        Arc::new(Self {
            statements: Mutex::new(Vec::new()),
            output: RawQueryOutput {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        })
    }

    fn recorded(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelationalStore for RecordingStore {
    async fn fetch_with_timeout(
        &self,
        sql: &str,
        _timeout_ms: u64,
        _fetch_limit: usize,
    ) -> Result<RawQueryOutput, ExecutionError> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(self.output.clone())
    }

    async fn row_estimate(&self, _sql: &str) -> Option<i64> {
        None
    }
}

/// Embedder that returns the same vector for every text, with a call
/// counter to observe the embedding cache.
struct StaticEmbedder {
    vector: Vec<f32>,
    calls: AtomicU32,
}

impl StaticEmbedder {
    fn new(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector,
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }

    fn model_name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }

    async fn available(&self) -> bool {
        true
    }
}

// ─── Assembly ───────────────────────────────────────────────────────

struct Pipeline {
    service: ChatService,
    sql: Arc<ScriptedProvider>,
    local: Arc<ScriptedProvider>,
    remote: Arc<ScriptedProvider>,
    store: Arc<RecordingStore>,
    embedder: Arc<StaticEmbedder>,
}

/// Honor RUST_LOG when a test run wants the pipeline's own logs.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assemble a service with a dedicated SQL provider so each adapter's
/// call count can be asserted separately.
fn pipeline(
    sql_script: &[&'static str],
    local_script: &[&'static str],
    remote_script: &[&'static str],
    store: Arc<RecordingStore>,
    index: Arc<MemoryIndex>,
) -> Pipeline {
    init_logs();

    let sql = ScriptedProvider::new("groq", false, sql_script);
    let local = ScriptedProvider::new("ollama", true, local_script);
    let remote = ScriptedProvider::new("groq", false, remote_script);
    let embedder = StaticEmbedder::new(vec![1.0, 0.0]);

    let service = ChatService::new(
        sql.clone(),
        SqlValidator::new(500),
        SqlExecutor::new(store.clone(), 10_000, 500, 0),
        RetrievalService::new(index, RetrievalConfig::default()),
        InferenceRouter::new(local.clone(), remote.clone()),
        CacheService::new(Arc::new(MemoryStore::new()), CacheConfig::default()),
        embedder.clone(),
        ContextBuilder::new(&ContextConfig::default()),
        0,
    );

    Pipeline {
        service,
        sql,
        local,
        remote,
        store,
        embedder,
    }
}

fn indexed(
    owner_id: i64,
    content_id: i64,
    kind: ContentKind,
    sensitivity: Sensitivity,
    text: &str,
) -> IndexedContent {
    IndexedContent {
        id: Uuid::new_v4(),
        owner_id,
        content_type: "expense".to_string(),
        content_id,
        kind,
        sensitivity,
        searchable_text: text.to_string(),
        embedding: vec![1.0, 0.0],
        metadata: json!({}),
        tags: vec![],
        reference_date: None,
        is_indexed: true,
        indexed_at: None,
        embedding_model: "all-MiniLM-L6-v2".to_string(),
    }
}

fn empty_store() -> Arc<RecordingStore> {
    RecordingStore::new(&[], Vec::new())
}

// ─── SQL path ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_structured_question_runs_sql_end_to_end() {
    let store = RecordingStore::new(
        &["category", "total"],
        vec![
            vec![json!("groceries"), json!(250.5)],
            vec![json!("transport"), json!(80.0)],
        ],
    );
    let p = pipeline(
        &[
            "```sql\nSELECT category, SUM(value) AS total FROM expenses_expense GROUP BY category\n```",
            "Groceries dominate this month's spending.",
        ],
        &[],
        &[],
        store,
        Arc::new(MemoryIndex::new()),
    );

    let response = p
        .service
        .query(QueryRequest::new("how much did I spend this month?", 42))
        .await
        .unwrap();

    assert_eq!(response.execution_mode, "sql");
    assert_eq!(response.routing_decision, "sql");
    assert_eq!(response.provider, "groq");
    assert_eq!(response.answer, "Groceries dominate this month's spending.");
    assert!(!response.cached);
    assert!(response.sources.is_empty());
    assert_eq!(response.data_rows.as_ref().map(|d| d.len()), Some(2));
    assert!(response.sql_query.is_some());
    assert_eq!(response.metadata["row_count"], 2);
    assert_eq!(response.metadata["truncated"], false);
    assert_eq!(response.metadata["query_type"], "aggregation");
    assert_eq!(response.metadata["intent"]["module"], "finance");
    assert_eq!(response.metadata["totals"]["row_count"], 2);

    // One generation call plus one summary call, nothing through the
    // router.
    assert_eq!(p.sql.call_count(), 2);
    assert_eq!(p.local.call_count(), 0);
    assert_eq!(p.remote.call_count(), 0);
}

#[tokio::test]
async fn test_generated_sql_is_owner_scoped_before_execution() {
    let store = RecordingStore::new(
        &["name", "current_balance"],
        vec![vec![json!("Checking"), json!(1200.0)]],
    );
    let p = pipeline(
        &[
            "SELECT name, current_balance FROM accounts_account",
            "You have one account.",
        ],
        &[],
        &[],
        store.clone(),
        Arc::new(MemoryIndex::new()),
    );

    p.service
        .query(QueryRequest::new("list my accounts", 7))
        .await
        .unwrap();

    let recorded = store.recorded();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].contains("accounts_account.owner_id = 7"));
    assert!(recorded[0].ends_with("LIMIT 500"));
}

#[tokio::test]
async fn test_sql_failure_falls_back_to_retrieval_silently() {
    let index = Arc::new(MemoryIndex::new());
    index.insert(indexed(
        42,
        1,
        ContentKind::Finance,
        Sensitivity::Low,
        "Expense: groceries at the market, value 54.30",
    ));
    let p = pipeline(
        &["I cannot write that query."],
        &["You spent 54.30 on groceries."],
        &[],
        empty_store(),
        index,
    );

    let response = p
        .service
        .query(QueryRequest::new("how much did I spend this month?", 42))
        .await
        .unwrap();

    assert_eq!(response.execution_mode, "rag");
    assert_eq!(response.provider, "ollama");
    assert_eq!(response.answer, "You spent 54.30 on groceries.");
    assert_eq!(response.sources.len(), 1);
    assert!(response.sql_query.is_none());
    // One failed generation attempt, then the local provider answered;
    // nothing reached the database.
    assert_eq!(p.sql.call_count(), 1);
    assert_eq!(p.local.call_count(), 1);
    assert!(p.store.recorded().is_empty());
}

// ─── Retrieval path ─────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_index_returns_polite_no_results() {
    let p = pipeline(&[], &[], &[], empty_store(), Arc::new(MemoryIndex::new()));

    let response = p
        .service
        .query(QueryRequest::new("tell me something interesting", 9))
        .await
        .unwrap();

    assert_eq!(response.routing_decision, "none");
    assert_eq!(response.provider, "none");
    assert!(response.sources.is_empty());
    assert_eq!(response.metadata["no_results"], true);
    assert_eq!(p.sql.call_count(), 0);
    assert_eq!(p.local.call_count(), 0);
    assert_eq!(p.remote.call_count(), 0);
}

#[tokio::test]
async fn test_complex_low_sensitivity_question_uses_the_remote_provider() {
    let index = Arc::new(MemoryIndex::new());
    index.insert(indexed(
        1,
        1,
        ContentKind::Finance,
        Sensitivity::Low,
        "Expense: groceries, value 54.30",
    ));
    index.insert(indexed(
        1,
        2,
        ContentKind::Finance,
        Sensitivity::Low,
        "Revenue: salary, value 3200",
    ));
    let p = pipeline(
        &[],
        &[],
        &["Spending tracks income closely."],
        empty_store(),
        index,
    );

    let response = p
        .service
        .query(QueryRequest::new("explain why my grocery spending changed", 1))
        .await
        .unwrap();

    assert_eq!(response.execution_mode, "rag");
    assert_eq!(response.routing_decision, "remote");
    assert_eq!(response.provider, "groq");
    assert_eq!(response.sources.len(), 2);
    assert_eq!(
        response.metadata["routing_reason"],
        "complex question over low-sensitivity data"
    );
    assert_eq!(response.metadata["result_count"], 2);
    assert_eq!(p.local.call_count(), 0);
    assert_eq!(p.remote.call_count(), 1);
}

#[tokio::test]
async fn test_security_content_never_reaches_the_remote_provider() {
    let index = Arc::new(MemoryIndex::new());
    let mut credential = indexed(
        1,
        1,
        ContentKind::Security,
        Sensitivity::Medium,
        "Password entry for netflix, username ana",
    );
    credential.content_type = "password".to_string();
    index.insert(credential);

    let p = pipeline(
        &[],
        &["You saved a netflix credential."],
        &["must never be used"],
        empty_store(),
        index,
    );

    let response = p
        .service
        .query(QueryRequest::new("tell me about my netflix entry", 1))
        .await
        .unwrap();

    assert_eq!(response.routing_decision, "local");
    assert_eq!(response.provider, "ollama");
    assert_eq!(response.metadata["has_security_content"], true);
    assert_eq!(
        response.metadata["routing_reason"],
        "security module content detected"
    );
    assert_eq!(p.remote.call_count(), 0);
    assert_eq!(p.local.call_count(), 1);
}

// ─── Cache gating ───────────────────────────────────────────────────

#[tokio::test]
async fn test_repeated_question_is_served_from_cache() {
    let index = Arc::new(MemoryIndex::new());
    index.insert(indexed(
        1,
        1,
        ContentKind::Finance,
        Sensitivity::Low,
        "Expense: rent, value 900",
    ));
    let p = pipeline(
        &[],
        &["Rent is your biggest cost."],
        &[],
        empty_store(),
        index,
    );

    let first = p
        .service
        .query(QueryRequest::new("tell me about my rent", 1))
        .await
        .unwrap();
    assert!(!first.cached);

    let second = p
        .service
        .query(QueryRequest::new("tell me about my rent", 1))
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.cache_type.as_deref(), Some("exact"));
    assert_eq!(second.answer, first.answer);
    // One generation and one embedding total; the repeat hit both
    // caches.
    assert_eq!(p.local.call_count(), 1);
    assert_eq!(p.embedder.call_count(), 1);
}

#[tokio::test]
async fn test_high_sensitivity_answers_are_never_cached() {
    let index = Arc::new(MemoryIndex::new());
    index.insert(indexed(
        1,
        1,
        ContentKind::Finance,
        Sensitivity::High,
        "Loan agreement with Ana, value 5000",
    ));
    let p = pipeline(
        &[],
        &["You hold one loan.", "You hold one loan."],
        &[],
        empty_store(),
        index,
    );

    let first = p
        .service
        .query(QueryRequest::new("tell me about agreements", 1))
        .await
        .unwrap();
    assert_eq!(first.metadata["max_sensitivity"], "high");
    assert_eq!(first.routing_decision, "local");

    let second = p
        .service
        .query(QueryRequest::new("tell me about agreements", 1))
        .await
        .unwrap();
    assert!(!second.cached);
    assert_eq!(p.local.call_count(), 2);
}

#[tokio::test]
async fn test_conversation_history_bypasses_the_cache() {
    let index = Arc::new(MemoryIndex::new());
    index.insert(indexed(
        1,
        1,
        ContentKind::Finance,
        Sensitivity::Low,
        "Expense: streaming subscription, value 39.90",
    ));
    let p = pipeline(
        &[],
        &["It renews monthly.", "Asked again, it renews monthly."],
        &[],
        empty_store(),
        index,
    );

    let history = vec![ChatMessage {
        role: "user".to_string(),
        content: "tell me about my subscriptions".to_string(),
    }];

    // A follow-up with history must neither read nor write the cache.
    let first = p
        .service
        .query(
            QueryRequest::new("tell me about my subscription date", 1)
                .with_history(history.clone()),
        )
        .await
        .unwrap();
    assert!(!first.cached);

    let second = p
        .service
        .query(QueryRequest::new("tell me about my subscription date", 1).with_history(history))
        .await
        .unwrap();
    assert!(!second.cached);
    assert_eq!(p.local.call_count(), 2);
}

// ─── Status ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_reports_component_health() {
    let p = pipeline(&[], &[], &[], empty_store(), Arc::new(MemoryIndex::new()));

    let status = p.service.status().await;

    assert_eq!(status["cache"], true);
    assert_eq!(status["embedding_service"]["available"], true);
    assert_eq!(status["embedding_service"]["model"], "all-MiniLM-L6-v2");
    assert_eq!(status["llm_router"]["local"]["name"], "ollama");
    assert_eq!(status["llm_router"]["local"]["available"], true);
    assert_eq!(status["llm_router"]["remote"]["name"], "groq");
    assert_eq!(status["llm_router"]["remote"]["available"], true);
}
