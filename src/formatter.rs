//! Shapes executed statement results into the structured response the
//! orchestrator returns.
//!
//! Produces a natural-language summary (model-written, with a plain
//! fallback when the model is down), the row data, totals over numeric
//! columns, and a visualization hint keyed off the query type. Nothing
//! here can fail the request: a dead summary provider degrades to the
//! basic summary.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::ProviderError;
use crate::models::{QueryResult, QueryType, SqlGenerationResult};
use crate::prompts::sql_answer_prompt;
use crate::providers::InferenceProvider;

const SUMMARY_SYSTEM: &str =
    "You are an assistant that answers questions based on database data.";
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 1000;
const PROMPT_MAX_ROWS: usize = 20;
const PROMPT_CELL_CHARS: usize = 30;

/// Columns never shown to the user.
const HIDDEN_COLUMNS: &[&str] = &["id", "uuid", "deleted_at", "is_deleted"];

/// Columns rendered with two decimals.
const MONEY_COLUMNS: &[&str] = &[
    "value",
    "total",
    "current_balance",
    "payed_value",
    "credit_limit",
    "net_amount",
    "total_amount",
    "paid_amount",
    "fee",
];

/// Columns shortened to their ISO date part.
const DATE_COLUMNS: &[&str] = &[
    "date",
    "reading_date",
    "scheduled_date",
    "start_date",
    "end_date",
    "due_date",
    "payment_date",
    "opening_date",
    "publish_date",
];

/// X-axis candidates for charts, first match wins.
const PERIOD_COLUMNS: &[&str] = &["month", "date", "day", "week", "year", "period"];

/// Structured response for an executed statement.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedResponse {
    pub summary: String,
    /// Rows as objects keyed by column name.
    pub data: Vec<Value>,
    pub totals: Option<Value>,
    pub sql_query: String,
    pub sql_explanation: String,
    pub visualization: Option<Value>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: f64,
}

pub struct SqlFormatter {
    provider: Arc<dyn InferenceProvider>,
}

impl SqlFormatter {
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self { provider }
    }

    /// Assemble the full response. Never fails: summary generation
    /// errors degrade to [`basic_summary`].
    pub async fn format(
        &self,
        result: &QueryResult,
        generation: &SqlGenerationResult,
        question: &str,
    ) -> FormattedResponse {
        let data = result.to_objects();
        let totals = calculate_totals(&data, &result.columns);
        let visualization = build_visualization(&data, generation.query_type, &result.columns);

        let summary = if result.row_count == 0 {
            empty_summary()
        } else {
            match self.model_summary(question, &result.sql, &data, &result.columns).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "summary generation failed, using basic summary");
                    basic_summary(&data, &result.columns)
                }
            }
        };

        FormattedResponse {
            summary,
            data,
            totals,
            sql_query: result.sql.clone(),
            sql_explanation: generation.explanation.clone(),
            visualization,
            row_count: result.row_count,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
        }
    }

    async fn model_summary(
        &self,
        question: &str,
        sql: &str,
        data: &[Value],
        columns: &[String],
    ) -> Result<String, ProviderError> {
        let results_text = results_for_prompt(data, columns);
        let prompt = sql_answer_prompt(question, sql, &results_text, data.len());
        let output = self
            .provider
            .generate(&prompt, Some(SUMMARY_SYSTEM), SUMMARY_TEMPERATURE, SUMMARY_MAX_TOKENS)
            .await?;
        Ok(output.text)
    }
}

/// Sum and average every numeric column except identifiers and counts.
/// Zero-sum columns are skipped; the row count always rides along.
fn calculate_totals(data: &[Value], columns: &[String]) -> Option<Value> {
    let first = data.first()?;
    let mut totals = Map::new();

    for col in columns {
        if col == "id" || col == "count" {
            continue;
        }
        if !first.get(col.as_str()).map(Value::is_number).unwrap_or(false) {
            continue;
        }
        let sum: f64 = data
            .iter()
            .filter_map(|row| row.get(col.as_str()))
            .filter_map(Value::as_f64)
            .sum();
        if sum > 0.0 {
            totals.insert(format!("{col}_total"), json!(sum));
            totals.insert(format!("{col}_avg"), json!(sum / data.len() as f64));
        }
    }

    totals.insert("row_count".to_string(), json!(data.len()));
    Some(Value::Object(totals))
}

fn build_visualization(data: &[Value], query_type: QueryType, columns: &[String]) -> Option<Value> {
    if data.is_empty() {
        return None;
    }
    Some(match query_type {
        QueryType::Trend => chart(data, columns, "line"),
        QueryType::Comparison => chart(data, columns, "bar"),
        QueryType::Aggregation => cards(data, columns),
        _ => table(data, columns),
    })
}

fn chart(data: &[Value], columns: &[String], chart_type: &str) -> Value {
    let x_col: Option<&str> = columns
        .iter()
        .map(String::as_str)
        .find(|c| PERIOD_COLUMNS.contains(c))
        .or_else(|| columns.first().map(String::as_str));

    let y_cols: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| x_col != Some(c))
        .filter(|c| data[0].get(*c).map(Value::is_number).unwrap_or(false))
        .collect();

    let y_axes: Vec<&str> = if y_cols.is_empty() {
        if columns.len() > 1 {
            vec![columns[1].as_str()]
        } else {
            Vec::new()
        }
    } else {
        y_cols
    };

    json!({
        "type": "chart",
        "chart_type": chart_type,
        "x_axis": x_col,
        "y_axes": y_axes,
        "data": data,
        "title": chart_title(columns),
    })
}

fn chart_title(columns: &[String]) -> &'static str {
    if columns.iter().any(|c| c == "value" || c == "total") {
        "Values over time"
    } else if columns.iter().any(|c| c == "pages_read") {
        "Pages read"
    } else if columns.iter().any(|c| c == "reading_time") {
        "Reading time"
    } else {
        "Chart"
    }
}

/// Aggregation results as stat cards: one card per column for a single
/// row, or a total card per numeric column for several.
fn cards(data: &[Value], columns: &[String]) -> Value {
    let mut cards = Vec::new();

    if data.len() == 1 {
        for col in columns {
            if col == "id" {
                continue;
            }
            let value = data[0].get(col.as_str()).unwrap_or(&Value::Null);
            cards.push(json!({
                "label": column_label(col),
                "value": display_value(value, col),
                "raw_value": value,
            }));
        }
    } else {
        for col in columns {
            if col == "id" {
                continue;
            }
            let non_null: Vec<&Value> = data
                .iter()
                .filter_map(|row| row.get(col.as_str()))
                .filter(|v| !v.is_null())
                .collect();
            let Some(first) = non_null.first() else {
                continue;
            };
            if !first.is_number() {
                continue;
            }
            let total: f64 = non_null.iter().filter_map(|v| v.as_f64()).sum();
            cards.push(json!({
                "label": format!("Total {}", column_label(col)),
                "value": display_value(&json!(total), col),
                "raw_value": total,
            }));
        }
    }

    json!({ "type": "cards", "cards": cards })
}

fn table(data: &[Value], columns: &[String]) -> Value {
    let visible: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| !HIDDEN_COLUMNS.contains(c))
        .collect();

    let headers: Vec<Value> = visible
        .iter()
        .map(|col| {
            json!({
                "key": col,
                "label": column_label(col),
                "align": if is_numeric_column(data, col) { "right" } else { "left" },
            })
        })
        .collect();

    let rows: Vec<Value> = data
        .iter()
        .map(|row| {
            let mut out = Map::new();
            for col in &visible {
                let value = row.get(*col).unwrap_or(&Value::Null);
                out.insert((*col).to_string(), Value::String(display_value(value, col)));
            }
            Value::Object(out)
        })
        .collect();

    json!({
        "type": "table",
        "columns": headers,
        "data": rows,
        "row_count": data.len(),
    })
}

fn is_numeric_column(data: &[Value], col: &str) -> bool {
    data.first()
        .and_then(|row| row.get(col))
        .map(Value::is_number)
        .unwrap_or(false)
}

fn basic_summary(data: &[Value], columns: &[String]) -> String {
    if data.is_empty() {
        return "No results found for your query.".to_string();
    }

    if data.len() == 1 {
        let parts: Vec<String> = columns
            .iter()
            .filter(|col| !HIDDEN_COLUMNS.contains(&col.as_str()))
            .map(|col| {
                let value = data[0].get(col.as_str()).unwrap_or(&Value::Null);
                format!("**{}**: {}", column_label(col), display_value(value, col))
            })
            .collect();
        return parts.join(" | ");
    }

    format!("Found **{}** records.", data.len())
}

fn empty_summary() -> String {
    "No data found for your query.\n\n\
     This can mean:\n\
     - No records match the criteria\n\
     - The requested period has no data\n\
     - The applied filters are too restrictive"
        .to_string()
}

/// Compact result table for the summary prompt: hidden columns dropped,
/// cells truncated, at most twenty rows.
fn results_for_prompt(data: &[Value], columns: &[String]) -> String {
    if data.is_empty() {
        return "No results".to_string();
    }

    let visible: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| !HIDDEN_COLUMNS.contains(c))
        .collect();

    let mut lines = vec![visible.join(" | "), "-".repeat(50)];

    for row in data.iter().take(PROMPT_MAX_ROWS) {
        let cells: Vec<String> = visible
            .iter()
            .map(|col| {
                let value = row.get(*col).unwrap_or(&Value::Null);
                display_value(value, col).chars().take(PROMPT_CELL_CHARS).collect()
            })
            .collect();
        lines.push(cells.join(" | "));
    }

    if data.len() > PROMPT_MAX_ROWS {
        lines.push(format!("... and {} more records", data.len() - PROMPT_MAX_ROWS));
    }

    lines.join("\n")
}

/// Humanize a column name: underscores to spaces, words title-cased.
fn column_label(col: &str) -> String {
    col.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render one cell for display. Money gets two decimals, booleans
/// Yes/No, dates their ISO date part, reading time hours and minutes,
/// nulls a dash.
fn display_value(value: &Value, col: &str) -> String {
    if value.is_null() {
        return "-".to_string();
    }

    let col_lower = col.to_lowercase();

    if MONEY_COLUMNS.contains(&col_lower.as_str()) || col_lower.ends_with("_total") {
        if let Some(v) = value.as_f64() {
            return format!("{v:.2}");
        }
    }

    if let Some(b) = value.as_bool() {
        return if b { "Yes" } else { "No" }.to_string();
    }

    if DATE_COLUMNS.contains(&col_lower.as_str()) {
        if let Some(date_part) = value.as_str().and_then(|s| s.get(..10)) {
            return date_part.to_string();
        }
    }

    if col_lower == "reading_time" {
        if let Some(minutes) = value.as_f64() {
            let minutes = minutes as i64;
            let hours = minutes / 60;
            let mins = minutes % 60;
            return if hours > 0 {
                format!("{hours}h {mins}min")
            } else {
                format!("{mins}min")
            };
        }
    }

    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
