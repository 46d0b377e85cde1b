//! Postgres-backed storage.
//!
//! `PgStore` is the single type touching the database. It backs the
//! seams the pipeline is written against: raw statement execution for
//! the SQL path, candidate loading for retrieval, the content-index
//! read/write surface, and the domain-record source the indexer reads
//! through the schema catalog.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, PgConnection, QueryBuilder, Row, TypeInfo};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::ExecutionError;
use crate::executor::{RawQueryOutput, RelationalStore};
use crate::indexer::{ContentWriter, RecordSource, SourceRecord};
use crate::models::{ContentKind, IndexedContent, RetrievalFilter, Sensitivity};
use crate::retrieval::ContentIndex;
use crate::schema::{catalog, TableDef};

const CONTENT_COLUMNS: &str = "id, owner_id, content_type, content_id, kind, sensitivity, \
     searchable_text, embedding, metadata, tags, reference_date, is_indexed, indexed_at, \
     embedding_model";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================
// Statement execution
// ============================================================

#[async_trait]
impl RelationalStore for PgStore {
    async fn fetch_with_timeout(
        &self,
        sql: &str,
        timeout_ms: u64,
        fetch_limit: usize,
    ) -> Result<RawQueryOutput, ExecutionError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ExecutionError::Unexpected(format!("acquiring connection: {e}")))?;

        // statement_timeout makes Postgres abort the statement itself,
        // so cancellation happens server-side rather than as an
        // abandoned client read.
        sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
            .execute(&mut *conn)
            .await
            .map_err(|e| ExecutionError::Unexpected(format!("setting statement timeout: {e}")))?;

        let outcome = fetch_rows(&mut conn, sql, fetch_limit).await;

        // The reset must run on the error path too, or the pooled
        // connection keeps this timeout for unrelated work.
        if let Err(e) = sqlx::query("RESET statement_timeout")
            .execute(&mut *conn)
            .await
        {
            warn!(error = %e, "failed to reset statement_timeout");
        }

        outcome.map_err(|e| map_execution_error(e, timeout_ms))
    }

    async fn row_estimate(&self, sql: &str) -> Option<i64> {
        let explain = format!("EXPLAIN (FORMAT JSON) {sql}");
        let row = match sqlx::query(&explain).fetch_one(&self.pool).await {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "row estimate failed");
                return None;
            }
        };

        let plan: Value = row.try_get(0).ok()?;
        let estimate = plan.get(0)?.get("Plan")?.get("Plan Rows")?;
        estimate
            .as_i64()
            .or_else(|| estimate.as_f64().map(|f| f as i64))
    }
}

async fn fetch_rows(
    conn: &mut PgConnection,
    sql: &str,
    limit: usize,
) -> Result<RawQueryOutput, sqlx::Error> {
    let mut stream = sqlx::query(sql).fetch(&mut *conn);
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<Value>> = Vec::new();

    while let Some(row) = stream.try_next().await? {
        if columns.is_empty() {
            columns = row.columns().iter().map(|c| c.name().to_string()).collect();
        }
        rows.push(decode_row(&row));
        if rows.len() >= limit {
            break;
        }
    }

    Ok(RawQueryOutput { columns, rows })
}

fn map_execution_error(err: sqlx::Error, timeout_ms: u64) -> ExecutionError {
    if let sqlx::Error::Database(ref db) = err {
        // 57014 is query_canceled; with statement_timeout set it means
        // the server aborted the statement at the deadline.
        if db.code().as_deref() == Some("57014") {
            return ExecutionError::Timeout { timeout_ms };
        }
        return ExecutionError::Database(db.message().to_string());
    }
    ExecutionError::Unexpected(err.to_string())
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| decode_value(row, idx))
        .collect()
}

/// Convert one column to a JSON-safe primitive: decimals become floats,
/// dates and timestamps ISO-8601 strings, binary best-effort text.
/// Undecodable values become null rather than failing the whole row.
fn decode_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name();

    match type_name {
        "BOOL" => json_or_null(row.try_get::<Option<bool>, _>(idx)),
        "INT2" => json_or_null(row.try_get::<Option<i16>, _>(idx)),
        "INT4" => json_or_null(row.try_get::<Option<i32>, _>(idx)),
        "INT8" => json_or_null(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => json_or_null(row.try_get::<Option<f32>, _>(idx)),
        "FLOAT8" => json_or_null(row.try_get::<Option<f64>, _>(idx)),
        "NUMERIC" => match row.try_get::<Option<Decimal>, _>(idx) {
            Ok(Some(d)) => d.to_f64().map(Value::from).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "VARCHAR" | "TEXT" | "BPCHAR" | "NAME" | "CHAR" => {
            json_or_null(row.try_get::<Option<String>, _>(idx))
        }
        "DATE" => match row.try_get::<Option<NaiveDate>, _>(idx) {
            Ok(Some(d)) => Value::String(d.to_string()),
            _ => Value::Null,
        },
        "TIMESTAMP" => match row.try_get::<Option<NaiveDateTime>, _>(idx) {
            Ok(Some(ts)) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            _ => Value::Null,
        },
        "TIMESTAMPTZ" => match row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            Ok(Some(ts)) => Value::String(ts.to_rfc3339()),
            _ => Value::Null,
        },
        "TIME" => match row.try_get::<Option<NaiveTime>, _>(idx) {
            Ok(Some(t)) => Value::String(t.to_string()),
            _ => Value::Null,
        },
        "UUID" => match row.try_get::<Option<Uuid>, _>(idx) {
            Ok(Some(u)) => Value::String(u.to_string()),
            _ => Value::Null,
        },
        "JSON" | "JSONB" => json_or_null(row.try_get::<Option<Value>, _>(idx)),
        "BYTEA" => match row.try_get::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(bytes)) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            _ => Value::Null,
        },
        other => {
            debug!(column_type = other, "unhandled column type, trying text");
            json_or_null(row.try_get::<Option<String>, _>(idx))
        }
    }
}

fn json_or_null<T: Into<Value>>(value: Result<Option<T>, sqlx::Error>) -> Value {
    match value {
        Ok(Some(v)) => v.into(),
        _ => Value::Null,
    }
}

// ============================================================
// Retrieval candidates
// ============================================================

/// Build the candidate query, pushing whatever filters the database can
/// evaluate down into SQL. The retrieval service re-checks the full
/// filter in memory, so pushdown is an optimization and not the source
/// of truth.
fn candidate_query(owner_id: i64, filter: Option<&RetrievalFilter>) -> QueryBuilder<'static, sqlx::Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {CONTENT_COLUMNS} FROM content_index WHERE is_indexed = true AND owner_id = "
    ));
    qb.push_bind(owner_id);

    if let Some(filter) = filter {
        if !filter.kinds.is_empty() {
            let kinds: Vec<String> = filter.kinds.iter().map(|k| k.as_str().to_string()).collect();
            qb.push(" AND kind = ANY(");
            qb.push_bind(kinds);
            qb.push(")");
        }
        if !filter.sensitivities.is_empty() {
            let levels: Vec<String> = filter
                .sensitivities
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            qb.push(" AND sensitivity = ANY(");
            qb.push_bind(levels);
            qb.push(")");
        }
        if !filter.content_types.is_empty() {
            qb.push(" AND content_type = ANY(");
            qb.push_bind(filter.content_types.clone());
            qb.push(")");
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND reference_date >= ");
            qb.push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND reference_date <= ");
            qb.push_bind(to);
        }
        if !filter.tags.is_empty() {
            qb.push(" AND tags ?| ");
            qb.push_bind(filter.tags.clone());
        }
    }

    qb
}

#[async_trait]
impl ContentIndex for PgStore {
    async fn candidates(
        &self,
        owner_id: i64,
        filter: Option<&RetrievalFilter>,
    ) -> anyhow::Result<Vec<IndexedContent>> {
        let rows = candidate_query(owner_id, filter)
            .build()
            .fetch_all(&self.pool)
            .await?;

        let mut contents = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_content(row) {
                Ok(content) => contents.push(content),
                Err(e) => warn!(error = %e, "skipping undecodable content_index row"),
            }
        }
        Ok(contents)
    }
}

fn decode_content(row: &PgRow) -> anyhow::Result<IndexedContent> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ContentKind::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown content kind '{kind_raw}'"))?;
    let sensitivity_raw: String = row.try_get("sensitivity")?;
    let sensitivity = Sensitivity::parse(&sensitivity_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown sensitivity '{sensitivity_raw}'"))?;

    let embedding: Vec<u8> = row.try_get("embedding")?;
    let tags: Value = row.try_get("tags")?;

    Ok(IndexedContent {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        content_type: row.try_get("content_type")?,
        content_id: row.try_get("content_id")?,
        kind,
        sensitivity,
        searchable_text: row.try_get("searchable_text")?,
        embedding: blob_to_vec(&embedding),
        metadata: row.try_get("metadata")?,
        tags: serde_json::from_value(tags)?,
        reference_date: row.try_get("reference_date")?,
        is_indexed: row.try_get("is_indexed")?,
        indexed_at: row.try_get("indexed_at")?,
        embedding_model: row.try_get("embedding_model")?,
    })
}

// ============================================================
// Index maintenance
// ============================================================

#[async_trait]
impl ContentWriter for PgStore {
    async fn find(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<Option<IndexedContent>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM content_index \
             WHERE owner_id = $1 AND content_type = $2 AND content_id = $3"
        ))
        .bind(owner_id)
        .bind(content_type)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_content).transpose()
    }

    async fn upsert(&self, content: &IndexedContent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO content_index (id, owner_id, content_type, content_id, kind, \
             sensitivity, searchable_text, embedding, metadata, tags, reference_date, \
             is_indexed, indexed_at, embedding_model) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (owner_id, content_type, content_id) DO UPDATE SET \
             kind = EXCLUDED.kind, sensitivity = EXCLUDED.sensitivity, \
             searchable_text = EXCLUDED.searchable_text, embedding = EXCLUDED.embedding, \
             metadata = EXCLUDED.metadata, tags = EXCLUDED.tags, \
             reference_date = EXCLUDED.reference_date, is_indexed = EXCLUDED.is_indexed, \
             indexed_at = EXCLUDED.indexed_at, embedding_model = EXCLUDED.embedding_model",
        )
        .bind(content.id)
        .bind(content.owner_id)
        .bind(&content.content_type)
        .bind(content.content_id)
        .bind(content.kind.as_str())
        .bind(content.sensitivity.as_str())
        .bind(&content.searchable_text)
        .bind(vec_to_blob(&content.embedding))
        .bind(&content.metadata)
        .bind(sqlx::types::Json(&content.tags))
        .bind(content.reference_date)
        .bind(content.is_indexed)
        .bind(content.indexed_at)
        .bind(&content.embedding_model)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM content_index \
             WHERE owner_id = $1 AND content_type = $2 AND content_id = $3",
        )
        .bind(owner_id)
        .bind(content_type)
        .bind(content_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_matching(
        &self,
        owner_id: Option<i64>,
        content_type: Option<&str>,
    ) -> anyhow::Result<u64> {
        let mut qb = QueryBuilder::<sqlx::Postgres>::new("DELETE FROM content_index WHERE 1 = 1");
        if let Some(owner_id) = owner_id {
            qb.push(" AND owner_id = ");
            qb.push_bind(owner_id);
        }
        if let Some(content_type) = content_type {
            qb.push(" AND content_type = ");
            qb.push_bind(content_type.to_string());
        }

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

// ============================================================
// Domain record source
// ============================================================

/// Projection for a domain table: every catalog column except the
/// sensitive ones, so secrets never enter the indexing path.
fn select_list(def: &TableDef) -> String {
    def.columns
        .iter()
        .filter(|c| !c.sensitive)
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn source_record(row: &PgRow, def: &TableDef) -> SourceRecord {
    let mut fields = serde_json::Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        fields.insert(column.name().to_string(), decode_value(row, idx));
    }
    let content_id = fields.get("id").and_then(Value::as_i64).unwrap_or_default();
    let owner_id = def
        .owner_column
        .and_then(|c| fields.get(c))
        .and_then(Value::as_i64);

    SourceRecord {
        content_id,
        owner_id,
        fields,
    }
}

#[async_trait]
impl RecordSource for PgStore {
    async fn load(&self, table: &str, content_id: i64) -> anyhow::Result<Option<SourceRecord>> {
        let Some(def) = catalog().table(table) else {
            anyhow::bail!("table '{table}' is not in the catalog");
        };

        let mut sql = format!("SELECT {} FROM {} WHERE id = $1", select_list(def), def.name);
        if def.soft_delete {
            sql.push_str(" AND deleted_at IS NULL");
        }

        let row = sqlx::query(&sql)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| source_record(&r, def)))
    }

    async fn list(&self, table: &str, owner_id: Option<i64>) -> anyhow::Result<Vec<SourceRecord>> {
        let Some(def) = catalog().table(table) else {
            anyhow::bail!("table '{table}' is not in the catalog");
        };

        let mut qb = QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {} FROM {} WHERE 1 = 1",
            select_list(def),
            def.name
        ));
        if def.soft_delete {
            qb.push(" AND deleted_at IS NULL");
        }
        if let Some(owner_id) = owner_id {
            let Some(owner_column) = def.owner_column else {
                anyhow::bail!("table '{}' has no owner column to scope by", def.name);
            };
            qb.push(format!(" AND {owner_column} = "));
            qb.push_bind(owner_id);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| source_record(r, def)).collect())
    }
}
