//! The orchestrator behind the single `query` entry point.
//!
//! Classifies the question's intent, tries the SQL path for structured
//! questions, and silently falls back to retrieval when any step of that
//! path fails. The retrieval path runs embed, cache probe, search,
//! context build, route, generate; cache writes are gated on sensitivity
//! and conversation history.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{CacheService, MemoryStore};
use crate::config::Config;
use crate::context::ContextBuilder;
use crate::db;
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::{EmbeddingError, QueryError, SqlPathError};
use crate::executor::SqlExecutor;
use crate::formatter::SqlFormatter;
use crate::generator::SqlGenerator;
use crate::intent::{self, IntentResult};
use crate::migrate;
use crate::models::{ChatMessage, ChatResponse, RetrievalFilter, Sensitivity};
use crate::providers::{GroqProvider, InferenceProvider, OllamaProvider};
use crate::retrieval::RetrievalService;
use crate::router::InferenceRouter;
use crate::store::PgStore;
use crate::validator::SqlValidator;

const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// One question plus its execution knobs. [`QueryRequest::new`] fills
/// the defaults; set the remaining fields directly or through the
/// `with_` helpers.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub owner_id: i64,
    pub filters: Option<RetrievalFilter>,
    /// Retrieval result count; `None` uses the configured default.
    pub top_k: Option<usize>,
    pub use_cache: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub history: Option<Vec<ChatMessage>>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, owner_id: i64) -> Self {
        Self {
            question: question.into(),
            owner_id,
            filters: None,
            top_k: None,
            use_cache: true,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            history: None,
        }
    }

    pub fn with_filters(mut self, filters: RetrievalFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = Some(history);
        self
    }

    /// History as the pipeline sees it: an empty list counts as none.
    fn history_slice(&self) -> Option<&[ChatMessage]> {
        self.history.as_deref().filter(|h| !h.is_empty())
    }
}

pub struct ChatService {
    generator: SqlGenerator,
    validator: SqlValidator,
    executor: SqlExecutor,
    formatter: SqlFormatter,
    retrieval: RetrievalService,
    router: InferenceRouter,
    cache: CacheService,
    embedder: Arc<dyn Embedder>,
    context: ContextBuilder,
    sql_provider: Arc<dyn InferenceProvider>,
    sql_retries: u32,
}

impl ChatService {
    /// Wire the service from parts. The SQL provider is shared by the
    /// generator and the formatter, so statements and their summaries
    /// always come from the same model.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sql_provider: Arc<dyn InferenceProvider>,
        validator: SqlValidator,
        executor: SqlExecutor,
        retrieval: RetrievalService,
        router: InferenceRouter,
        cache: CacheService,
        embedder: Arc<dyn Embedder>,
        context: ContextBuilder,
        sql_retries: u32,
    ) -> Self {
        Self {
            generator: SqlGenerator::new(Arc::clone(&sql_provider)),
            formatter: SqlFormatter::new(Arc::clone(&sql_provider)),
            validator,
            executor,
            retrieval,
            router,
            cache,
            embedder,
            context,
            sql_provider,
            sql_retries,
        }
    }

    /// Build the full object graph from configuration: database pool
    /// plus migrations, embedding client, both provider adapters, and
    /// an in-process cache store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.database).await?;
        migrate::run_migrations(&pool).await?;
        let store = PgStore::new(pool);

        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding)?);
        let local: Arc<dyn InferenceProvider> =
            Arc::new(OllamaProvider::new(&config.providers.local)?);
        let remote: Arc<dyn InferenceProvider> =
            Arc::new(GroqProvider::new(&config.providers.remote)?);

        let sql_provider = if config.sql.provider == "local" {
            Arc::clone(&local)
        } else {
            Arc::clone(&remote)
        };

        let executor = SqlExecutor::new(
            Arc::new(store.clone()),
            config.sql.statement_timeout_ms,
            config.sql.max_rows,
            config.sql.max_retries,
        );
        let retrieval = RetrievalService::new(Arc::new(store), config.retrieval.clone());

        Ok(Self::new(
            sql_provider,
            SqlValidator::new(config.sql.max_rows),
            executor,
            retrieval,
            InferenceRouter::new(local, remote),
            CacheService::new(Arc::new(MemoryStore::new()), config.cache.clone()),
            embedder,
            ContextBuilder::new(&config.context),
            config.sql.max_retries,
        ))
    }

    /// Answer one question. SQL-path failures never surface: they
    /// degrade to the retrieval path. Retrieval-path provider and
    /// embedding failures do surface, distinguishing configuration
    /// problems from transient ones.
    pub async fn query(&self, request: QueryRequest) -> Result<ChatResponse, QueryError> {
        info!(owner_id = request.owner_id, "processing question");

        let intent = intent::classify(&request.question, request.history_slice());
        info!(
            module = %intent.module,
            intent_type = intent.intent_type.as_str(),
            execution_mode = intent.execution_mode.as_str(),
            confidence = intent.confidence,
            "intent classified"
        );

        if intent.should_use_sql() {
            match self.sql_query(&request, &intent).await {
                Ok(response) => return Ok(response),
                Err(e) => warn!(error = %e, "SQL path failed, falling back to retrieval"),
            }
        }

        self.rag_query(&request).await
    }

    async fn sql_query(
        &self,
        request: &QueryRequest,
        intent: &IntentResult,
    ) -> Result<ChatResponse, SqlPathError> {
        let generation = self
            .generator
            .generate_with_retry(&request.question, self.sql_retries)
            .await?;

        let sanitized = self.validator.validate(&generation.sql, request.owner_id)?;
        for warning in &sanitized.warnings {
            warn!(warning = %warning, "statement sanitized with caveats");
        }

        let result = self.executor.execute_with_retry(&sanitized.sql).await?;

        let formatted = self
            .formatter
            .format(&result, &generation, &request.question)
            .await;

        let mut metadata = json!({
            "row_count": formatted.row_count,
            "truncated": formatted.truncated,
            "execution_time_ms": formatted.execution_time_ms,
            "query_type": generation.query_type.as_str(),
            "module": generation.module,
            "tables": generation.tables,
            "confidence": generation.confidence,
            "intent": {
                "module": intent.module,
                "intent_type": intent.intent_type.as_str(),
                "confidence": intent.confidence,
            },
        });
        if let Some(totals) = formatted.totals {
            metadata["totals"] = totals;
        }

        Ok(ChatResponse {
            answer: formatted.summary,
            sources: Vec::new(),
            routing_decision: "sql".to_string(),
            provider: self.sql_provider.name().to_string(),
            cached: false,
            cache_type: None,
            similarity: None,
            execution_mode: "sql".to_string(),
            sql_query: Some(formatted.sql_query),
            sql_explanation: Some(formatted.sql_explanation),
            data_rows: Some(formatted.data),
            visualization: formatted.visualization,
            metadata,
        })
    }

    async fn rag_query(&self, request: &QueryRequest) -> Result<ChatResponse, QueryError> {
        let owner_id = request.owner_id;
        let history = request.history_slice();
        let filters = request.filters.as_ref();

        let query_embedding = self.query_embedding(&request.question).await?;

        // Follow-ups depend on the history, so cached answers to the
        // bare question text would be wrong for them.
        if request.use_cache && history.is_none() {
            if let Some(cached) = self
                .cache_probe(&request.question, &query_embedding, owner_id, filters)
                .await
            {
                info!(
                    owner_id,
                    cache_type = cached.cache_type.as_deref().unwrap_or("unknown"),
                    "cache hit"
                );
                return Ok(cached);
            }
        }

        let results = self
            .retrieval
            .search(owner_id, &query_embedding, filters, request.top_k)
            .await?;

        if results.is_empty() {
            info!(owner_id, "nothing indexed matched the question");
            return Ok(empty_response());
        }

        let built = self.context.build(&results);

        let (output, routing) = self
            .router
            .generate(
                &request.question,
                &built.text,
                &results,
                request.temperature,
                request.max_tokens,
                history,
            )
            .await?;

        let response = ChatResponse {
            answer: output.text,
            sources: results.iter().map(|r| r.to_source()).collect(),
            routing_decision: routing.decision.as_str().to_string(),
            provider: routing.provider_name.clone(),
            cached: false,
            cache_type: None,
            similarity: None,
            execution_mode: "rag".to_string(),
            sql_query: None,
            sql_explanation: None,
            data_rows: None,
            visualization: None,
            metadata: json!({
                "tokens_used": output.tokens_used,
                "context_tokens": built.token_count,
                "result_count": built.result_count,
                "context_truncated": built.truncated,
                "max_sensitivity": routing.max_sensitivity.as_str(),
                "has_security_content": routing.has_restricted_content,
                "routing_reason": routing.reason,
            }),
        };

        if request.use_cache && routing.max_sensitivity != Sensitivity::High && history.is_none() {
            self.cache_write(&request.question, &query_embedding, &response, owner_id, filters)
                .await;
        }

        info!(
            owner_id,
            provider = %response.provider,
            results = results.len(),
            "retrieval answer generated"
        );
        Ok(response)
    }

    /// Query embedding, served from the embedding cache when possible.
    async fn query_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.embedder.model_name();

        match self.cache.get_embedding(text, model).await {
            Ok(Some(vector)) => {
                debug!("query embedding served from cache");
                return Ok(vector);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "embedding cache read failed"),
        }

        let vector = self.embedder.embed(text).await?;

        if let Err(e) = self.cache.set_embedding(text, &vector, model).await {
            warn!(error = %e, "embedding cache write failed");
        }

        Ok(vector)
    }

    /// Cache probe; any store failure is a miss.
    async fn cache_probe(
        &self,
        question: &str,
        embedding: &[f32],
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) -> Option<ChatResponse> {
        match self.cache.get(question, embedding, owner_id, filters).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "cache probe failed, continuing without it");
                None
            }
        }
    }

    async fn cache_write(
        &self,
        question: &str,
        embedding: &[f32],
        response: &ChatResponse,
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) {
        if let Err(e) = self
            .cache
            .set(question, embedding, response, owner_id, filters)
            .await
        {
            warn!(error = %e, "cache write failed");
        }
    }

    /// Health snapshot of every external dependency.
    pub async fn status(&self) -> serde_json::Value {
        json!({
            "cache": self.cache.health_check().await,
            "embedding_service": {
                "available": self.embedder.available().await,
                "model": self.embedder.model_name(),
            },
            "llm_router": self.router.provider_status().await,
        })
    }
}

/// Response for a question nothing indexed can answer.
fn empty_response() -> ChatResponse {
    ChatResponse {
        answer: "Sorry, I could not find any relevant information for your question."
            .to_string(),
        sources: Vec::new(),
        routing_decision: "none".to_string(),
        provider: "none".to_string(),
        cached: false,
        cache_type: None,
        similarity: None,
        execution_mode: "rag".to_string(),
        sql_query: None,
        sql_explanation: None,
        data_rows: None,
        visualization: None,
        metadata: json!({ "no_results": true }),
    }
}
