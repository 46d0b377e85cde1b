//! Execution of sanitized SQL statements.
//!
//! The executor owns the safety envelope around the relational store: a
//! per-statement timeout, a row fetch cap with truncation detection, and
//! a bounded retry wrapper that never retries a timeout. The store
//! itself is behind a trait so the envelope is testable without a
//! database.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::models::QueryResult;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Columns and decoded rows as they come back from the store, already
/// converted to JSON-safe values.
#[derive(Debug, Clone, Default)]
pub struct RawQueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Low-level access to the relational database.
///
/// `fetch_with_timeout` must enforce the timeout server-side, so a
/// runaway statement is aborted on the database and not merely
/// abandoned by the caller, and must leave the connection's timeout
/// setting restored on every path.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn fetch_with_timeout(
        &self,
        sql: &str,
        timeout_ms: u64,
        fetch_limit: usize,
    ) -> Result<RawQueryOutput, ExecutionError>;

    /// Planner row estimate, advisory only. `None` when estimation
    /// fails for any reason.
    async fn row_estimate(&self, sql: &str) -> Option<i64>;
}

pub struct SqlExecutor {
    store: Arc<dyn RelationalStore>,
    timeout_ms: u64,
    max_rows: usize,
    max_retries: u32,
}

impl SqlExecutor {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        timeout_ms: u64,
        max_rows: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            timeout_ms,
            max_rows,
            max_retries,
        }
    }

    /// Run one sanitized statement. Fetches one row past the cap so
    /// truncation is detected without a second round trip.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let started = Instant::now();

        let raw = self
            .store
            .fetch_with_timeout(sql, self.timeout_ms, self.max_rows + 1)
            .await?;

        let truncated = raw.rows.len() > self.max_rows;
        let mut rows = raw.rows;
        if truncated {
            rows.truncate(self.max_rows);
        }

        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            rows = rows.len(),
            truncated,
            elapsed_ms = execution_time_ms,
            "statement executed"
        );

        Ok(QueryResult {
            columns: raw.columns,
            row_count: rows.len(),
            rows,
            truncated,
            execution_time_ms,
            sql: sql.to_string(),
        })
    }

    /// Retry wrapper for transient faults. Timeouts are final: the
    /// statement was already canceled server-side and rerunning it
    /// would only stack another full timeout on the caller.
    pub async fn execute_with_retry(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let mut last_err = ExecutionError::Unexpected("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            match self.execute(sql).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => {
                    if attempt < self.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            error = %e,
                            "statement failed, retrying"
                        );
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Planner estimate of rows the statement would return.
    pub async fn row_estimate(&self, sql: &str) -> Option<i64> {
        self.store.row_estimate(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedStore {
        outcomes: Mutex<Vec<Result<RawQueryOutput, ExecutionError>>>,
        calls: AtomicU32,
        seen_limit: AtomicU32,
    }

    impl ScriptedStore {
        fn new(outcomes: Vec<Result<RawQueryOutput, ExecutionError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
                seen_limit: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelationalStore for ScriptedStore {
        async fn fetch_with_timeout(
            &self,
            _sql: &str,
            _timeout_ms: u64,
            fetch_limit: usize,
        ) -> Result<RawQueryOutput, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_limit.store(fetch_limit as u32, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(RawQueryOutput::default())
            } else {
                outcomes.remove(0)
            }
        }

        async fn row_estimate(&self, _sql: &str) -> Option<i64> {
            Some(123)
        }
    }

    fn rows_of(n: usize) -> RawQueryOutput {
        RawQueryOutput {
            columns: vec!["value".to_string()],
            rows: (0..n).map(|i| vec![serde_json::json!(i)]).collect(),
        }
    }

    #[tokio::test]
    async fn test_fetches_one_row_past_the_cap() {
        let store = ScriptedStore::new(vec![Ok(rows_of(3))]);
        let executor = SqlExecutor::new(store.clone(), 10_000, 50, 0);

        executor.execute("SELECT 1").await.unwrap();
        assert_eq!(store.seen_limit.load(Ordering::SeqCst), 51);
    }

    #[tokio::test]
    async fn test_truncation_detected_and_rows_capped() {
        let store = ScriptedStore::new(vec![Ok(rows_of(6))]);
        let executor = SqlExecutor::new(store, 10_000, 5, 0);

        let result = executor.execute("SELECT 1").await.unwrap();
        assert!(result.truncated);
        assert_eq!(result.row_count, 5);
        assert_eq!(result.rows.len(), 5);
    }

    #[tokio::test]
    async fn test_exactly_max_rows_is_not_truncated() {
        let store = ScriptedStore::new(vec![Ok(rows_of(5))]);
        let executor = SqlExecutor::new(store, 10_000, 5, 0);

        let result = executor.execute("SELECT 1").await.unwrap();
        assert!(!result.truncated);
        assert_eq!(result.row_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_never_retried() {
        let store = ScriptedStore::new(vec![
            Err(ExecutionError::Timeout { timeout_ms: 10 }),
            Ok(rows_of(1)),
        ]);
        let executor = SqlExecutor::new(store.clone(), 10, 5, 2);

        let err = executor.execute_with_retry("SELECT 1").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_database_error_is_retried() {
        let store = ScriptedStore::new(vec![
            Err(ExecutionError::Database("connection reset".to_string())),
            Ok(rows_of(2)),
        ]);
        let executor = SqlExecutor::new(store.clone(), 10_000, 5, 2);

        let result = executor.execute_with_retry("SELECT 1").await.unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surfaces_last_error() {
        let store = ScriptedStore::new(vec![
            Err(ExecutionError::Database("one".to_string())),
            Err(ExecutionError::Database("two".to_string())),
            Err(ExecutionError::Database("three".to_string())),
        ]);
        let executor = SqlExecutor::new(store.clone(), 10_000, 5, 2);

        let err = executor.execute_with_retry("SELECT 1").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Database(ref m) if m == "three"));
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_execution_time_and_sql_are_recorded() {
        let store = ScriptedStore::new(vec![Ok(rows_of(1))]);
        let executor = SqlExecutor::new(store, 10_000, 5, 0);

        let result = executor.execute("SELECT value FROM x").await.unwrap();
        assert_eq!(result.sql, "SELECT value FROM x");
        assert!(result.execution_time_ms >= 0.0);
    }
}
