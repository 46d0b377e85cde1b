//! Typed errors for the query pipeline.
//!
//! The orchestrator matches on these to decide between surfacing a failure
//! and silently falling back: SQL-path errors (generation, validation,
//! execution) always degrade to the RAG path, provider and embedding errors
//! on the RAG path surface to the caller, and cache errors are recovered
//! locally and never escape the cache layer.

use thiserror::Error;

/// Natural-language → SQL generation failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No SQL statement could be extracted from the provider's response.
    #[error("no SQL statement found in provider response")]
    NoSql,

    /// A statement was extracted but failed the structural sanity check.
    #[error("generated SQL failed structural check: {0}")]
    InvalidSql(String),

    /// The inference provider call itself failed.
    #[error("SQL generation provider call failed: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Stable machine-readable tag for logs and response metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::NoSql => "no_sql",
            GenerationError::InvalidSql(_) => "invalid_sql",
            GenerationError::Provider(_) => "provider_error",
        }
    }
}

/// SQL safety-validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A write/DDL keyword appeared anywhere in the statement.
    #[error("forbidden keyword in statement: {0}")]
    ForbiddenKeyword(String),

    /// The statement references a table outside the known schema.
    #[error("unknown table referenced: {0}")]
    UnknownTable(String),

    /// The statement selects a column flagged sensitive.
    #[error("sensitive column referenced: {0}")]
    SensitiveColumn(String),

    /// The statement could not be analyzed at all.
    #[error("statement could not be parsed: {0}")]
    Unparseable(String),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::ForbiddenKeyword(_) => "forbidden_keyword",
            ValidationError::UnknownTable(_) => "unknown_table",
            ValidationError::SensitiveColumn(_) => "sensitive_column",
            ValidationError::Unparseable(_) => "unparseable",
        }
    }
}

/// SQL execution failures.
///
/// `Timeout` is the hard cancellation boundary: it is never retried, and
/// the executor guarantees the statement-level timeout setting has been
/// reset by the time this error is returned.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("statement timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("unexpected execution error: {0}")]
    Unexpected(String),
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Database(_) => "database_error",
            ExecutionError::Unexpected(_) => "unexpected_error",
        }
    }
}

/// Any failure on the SQL path. The orchestrator catches this family and
/// falls back to retrieval instead of surfacing it.
#[derive(Debug, Error)]
pub enum SqlPathError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Embedding-service failures.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The service could not be reached (connect error, timeout, 503).
    #[error("cannot reach embedding service at {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The service is reachable but its model is not loaded.
    #[error("embedding model '{model}' is not available")]
    ModelUnavailable { model: String },

    /// The service rejected the request or returned malformed data.
    #[error("embedding generation failed: {0}")]
    GenerationFailed(String),
}

impl EmbeddingError {
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::Connection { .. } => "connection",
            EmbeddingError::ModelUnavailable { .. } => "model_unavailable",
            EmbeddingError::GenerationFailed(_) => "generation_failed",
        }
    }
}

/// Inference-provider failures.
///
/// `NotConfigured` means operator action is required (missing API key,
/// missing model); `Unavailable` means the provider exists but is not
/// responding right now. The router never converts one provider's failure
/// into a call to the other; routing is sensitivity-driven, not
/// availability-driven.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{provider}' is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },

    #[error("provider '{provider}' is unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("provider '{provider}' request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::NotConfigured { provider, .. }
            | ProviderError::Unavailable { provider, .. }
            | ProviderError::RequestFailed { provider, .. } => provider,
        }
    }

    /// True when the failure requires operator action rather than a retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::NotConfigured { .. })
    }
}

/// Cache-layer failures. Always recovered where they occur: the cache is a
/// performance optimization, never a correctness dependency.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(String),

    #[error("cache payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors surfaced by the orchestrator's `query` entry point.
///
/// SQL-path errors never appear here; they degrade to the RAG path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl QueryError {
    /// True when the error requires operator action (surfaced as a
    /// configuration problem rather than a transient fault).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QueryError::Provider(ProviderError::NotConfigured { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_kinds() {
        assert_eq!(GenerationError::NoSql.kind(), "no_sql");
        assert_eq!(
            GenerationError::InvalidSql("x".into()).kind(),
            "invalid_sql"
        );
        assert_eq!(
            GenerationError::Provider("down".into()).kind(),
            "provider_error"
        );
    }

    #[test]
    fn test_validation_error_kinds() {
        assert_eq!(
            ValidationError::ForbiddenKeyword("DROP".into()).kind(),
            "forbidden_keyword"
        );
        assert_eq!(
            ValidationError::UnknownTable("users".into()).kind(),
            "unknown_table"
        );
        assert_eq!(
            ValidationError::SensitiveColumn("_secret".into()).kind(),
            "sensitive_column"
        );
        assert_eq!(
            ValidationError::Unparseable("empty".into()).kind(),
            "unparseable"
        );
    }

    #[test]
    fn test_timeout_is_never_mistaken_for_database_error() {
        let timeout = ExecutionError::Timeout { timeout_ms: 10_000 };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.kind(), "timeout");

        let db = ExecutionError::Database("connection reset".into());
        assert!(!db.is_timeout());
        assert_eq!(db.kind(), "database_error");
    }

    #[test]
    fn test_sql_path_error_wraps_all_three_families() {
        let g: SqlPathError = GenerationError::NoSql.into();
        let v: SqlPathError = ValidationError::Unparseable("".into()).into();
        let e: SqlPathError = ExecutionError::Timeout { timeout_ms: 1 }.into();
        assert!(matches!(g, SqlPathError::Generation(_)));
        assert!(matches!(v, SqlPathError::Validation(_)));
        assert!(matches!(e, SqlPathError::Execution(_)));
    }

    #[test]
    fn test_provider_configuration_distinction() {
        let missing = ProviderError::NotConfigured {
            provider: "groq".into(),
            reason: "GROQ_API_KEY not set".into(),
        };
        assert!(missing.is_configuration());
        assert_eq!(missing.provider(), "groq");

        let down = ProviderError::Unavailable {
            provider: "ollama".into(),
            reason: "connection refused".into(),
        };
        assert!(!down.is_configuration());

        let query_err: QueryError = missing.into();
        assert!(query_err.is_configuration());
        let query_err: QueryError = down.into();
        assert!(!query_err.is_configuration());
    }
}
