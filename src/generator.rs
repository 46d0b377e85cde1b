//! Natural-language to SQL generation.
//!
//! Builds a schema-aware prompt, asks an inference provider for a single
//! statement, and extracts it from the raw response with ordered pattern
//! attempts: fenced code block, then bare SELECT, then WITH. Extraction
//! is deliberately narrow; anything it cannot recognize becomes a
//! `GenerationError` and the caller falls back to retrieval.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::models::{QueryType, SqlGenerationResult};
use crate::prompts::{detect_module, detect_query_type, sql_system_prompt};
use crate::providers::InferenceProvider;
use crate::schema::catalog;

const BASE_TEMPERATURE: f32 = 0.1;
const SQL_MAX_TOKENS: u32 = 500;

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:sql)?\s*((?:SELECT|WITH).*?)```").expect("static regex"));
static BARE_SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)(SELECT\s+.+?)(?:;|\n\n|$)").expect("static regex"));
static WITH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)(WITH\s+.+?SELECT.+?)(?:;|\n\n|$)").expect("static regex"));
static TRAILING_PROSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\n[^A-Z\s].*$").expect("static regex"));
static FROM_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+(\w+)").expect("static regex"));
static JOIN_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bJOIN\s+(\w+)").expect("static regex"));

pub struct SqlGenerator {
    provider: Arc<dyn InferenceProvider>,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self { provider }
    }

    /// One generation attempt at the given temperature.
    pub async fn generate(
        &self,
        question: &str,
        temperature: f32,
    ) -> Result<SqlGenerationResult, GenerationError> {
        let query_type = detect_query_type(question);
        let module = detect_module(question);

        info!(
            query_type = query_type.as_str(),
            module, "generating SQL statement"
        );

        let system_prompt = sql_system_prompt(&catalog().prompt_block());
        let user_prompt = build_user_prompt(question, query_type, module);

        let output = self
            .provider
            .generate(&user_prompt, Some(&system_prompt), temperature, SQL_MAX_TOKENS)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let sql = extract_sql(&output.text).ok_or(GenerationError::NoSql)?;
        structural_check(&sql)?;

        let tables = extract_tables(&sql);

        Ok(SqlGenerationResult {
            explanation: build_explanation(&sql, &tables),
            confidence: estimate_confidence(&sql, question),
            sql,
            query_type,
            module: module.to_string(),
            tables,
        })
    }

    /// Retry wrapper: temperature rises slightly per attempt for output
    /// variety. All attempts failing returns the last error.
    pub async fn generate_with_retry(
        &self,
        question: &str,
        max_retries: u32,
    ) -> Result<SqlGenerationResult, GenerationError> {
        let mut last_err = GenerationError::NoSql;

        for attempt in 0..=max_retries {
            let temperature = BASE_TEMPERATURE + attempt as f32 * 0.1;
            match self.generate(question, temperature).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "SQL generation attempt failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

fn build_user_prompt(question: &str, query_type: QueryType, module: &str) -> String {
    let mut parts = vec![
        format!("User question: {question}"),
        String::new(),
        format!("Detected query type: {}", query_type.as_str()),
        format!("Detected module: {module}"),
        String::new(),
        "Generate ONLY the SQL, with no explanations. The SQL must be ready to execute."
            .to_string(),
    ];

    match query_type {
        QueryType::Aggregation => {
            parts.push("Use aggregate functions (SUM, COUNT, AVG) as appropriate.".to_string());
        }
        QueryType::Trend => {
            parts.push(
                "Use DATE_TRUNC to group by period and ORDER BY to sort chronologically."
                    .to_string(),
            );
        }
        QueryType::Listing => {
            parts.push("Return the relevant columns and order them sensibly.".to_string());
        }
        _ => {}
    }

    parts.join("\n")
}

/// Pull a statement out of a raw model response. Ordered attempts:
/// fenced block, bare SELECT (up to a semicolon, blank line, or the
/// end), WITH. Returns `None` when nothing recognizable is present.
pub fn extract_sql(response: &str) -> Option<String> {
    if let Some(captures) = FENCED_RE.captures(response) {
        return Some(captures[1].trim().to_string());
    }

    if let Some(captures) = BARE_SELECT_RE.captures(response) {
        let sql = captures[1].trim();
        // Drop trailing prose lines that clearly are not SQL.
        let sql = TRAILING_PROSE_RE.replace(sql, "");
        return Some(sql.trim().to_string());
    }

    if let Some(captures) = WITH_RE.captures(response) {
        return Some(captures[1].trim().to_string());
    }

    None
}

/// Cheap shape check before the real validator runs.
fn structural_check(sql: &str) -> Result<(), GenerationError> {
    let upper = sql.to_uppercase();
    let trimmed = upper.trim_start();
    if !trimmed.starts_with("SELECT") && !trimmed.starts_with("WITH") {
        return Err(GenerationError::InvalidSql(
            "statement does not start with SELECT or WITH".to_string(),
        ));
    }
    if !upper.contains("FROM") {
        return Err(GenerationError::InvalidSql(
            "statement has no FROM clause".to_string(),
        ));
    }
    Ok(())
}

/// Table names referenced in FROM/JOIN clauses, filtered to the known
/// schema.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for re in [&*FROM_TABLE_RE, &*JOIN_TABLE_RE] {
        for captures in re.captures_iter(sql) {
            let name = captures[1].to_lowercase();
            if catalog().is_known_table(&name) && !tables.contains(&name) {
                tables.push(name);
            }
        }
    }
    tables
}

fn readable_table(table: &str) -> &str {
    match table {
        "expenses_expense" => "expenses",
        "revenues_revenue" => "revenues",
        "library_book" => "books",
        "library_reading" => "readings",
        "accounts_account" => "accounts",
        "personal_planning_goal" => "goals",
        "personal_planning_taskinstance" => "tasks",
        "security_password" => "passwords",
        other => other,
    }
}

/// Rule-based one-line description of what the statement does.
fn build_explanation(sql: &str, tables: &[String]) -> String {
    let upper = sql.to_uppercase();
    let mut parts: Vec<String> = Vec::new();

    if upper.contains("SUM(") {
        parts.push("sums values".to_string());
    }
    if upper.contains("COUNT(") {
        parts.push("counts records".to_string());
    }
    if upper.contains("AVG(") {
        parts.push("averages values".to_string());
    }
    if upper.contains("GROUP BY") {
        parts.push("groups results".to_string());
    }
    if upper.contains("ORDER BY") {
        if upper.contains("DESC") {
            parts.push("sorts from largest to smallest".to_string());
        } else {
            parts.push("sorts results".to_string());
        }
    }
    if upper.contains("DATE_TRUNC") {
        parts.push("groups by period".to_string());
    }
    if !tables.is_empty() {
        let readable: Vec<&str> = tables.iter().map(|t| readable_table(t)).collect();
        parts.push(format!("reads {}", readable.join(", ")));
    }

    if parts.is_empty() {
        "Statement generated to answer the question.".to_string()
    } else {
        format!("This statement {}.", parts.join(", "))
    }
}

/// Heuristic confidence in [0.7, 0.95]. Rewards complete structure,
/// explicit soft-delete filtering, and unambiguous question wording.
fn estimate_confidence(sql: &str, question: &str) -> f32 {
    let upper = sql.to_uppercase();
    let lower = sql.to_lowercase();
    let mut confidence = 0.7f32;

    if upper.contains("SELECT") && upper.contains("FROM") {
        confidence += 0.1;
    }
    if upper.contains("WHERE") {
        confidence += 0.05;
    }
    if lower.contains("deleted_at is null") || lower.contains("is_deleted") {
        confidence += 0.05;
    }

    let question_lower = question.to_lowercase();
    let clear_keywords = ["how much", "how many", "which", "list", "show", "total"];
    if clear_keywords.iter().any(|kw| question_lower.contains(kw)) {
        confidence += 0.05;
    }

    confidence.min(0.95)
}
