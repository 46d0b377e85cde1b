//! Content extraction and indexing.
//!
//! Walks the domain tables, turns each record into labeled searchable
//! text with tags and metadata, embeds that text, and upserts one
//! [`IndexedContent`] row per record. Extraction is per content type;
//! the password extractor indexes service metadata only and the secret
//! column never reaches it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::models::{ContentKind, IndexedContent, Sensitivity};
use crate::retrieval::MemoryIndex;

/// Modules in indexing order.
pub const MODULES: &[&str] = &["finance", "security", "library", "planning"];

/// One domain row handed to an extractor, column name to JSON value.
#[derive(Debug, Clone, Default)]
pub struct SourceRecord {
    pub content_id: i64,
    pub owner_id: Option<i64>,
    pub fields: Map<String, Value>,
}

/// Read access to the domain tables feeding the index.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// A single live record by table and id. Soft-deleted rows are
    /// treated as absent.
    async fn load(&self, table: &str, content_id: i64) -> anyhow::Result<Option<SourceRecord>>;

    /// All live records of a table, optionally narrowed to one owner.
    async fn list(&self, table: &str, owner_id: Option<i64>) -> anyhow::Result<Vec<SourceRecord>>;
}

/// Write access to the content index.
#[async_trait]
pub trait ContentWriter: Send + Sync {
    async fn find(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<Option<IndexedContent>>;

    async fn upsert(&self, content: &IndexedContent) -> anyhow::Result<()>;

    /// Remove one record's entry. Returns whether it existed.
    async fn remove(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<bool>;

    /// Remove every entry matching the given scope; `None` means any.
    async fn remove_matching(
        &self,
        owner_id: Option<i64>,
        content_type: Option<&str>,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
impl ContentWriter for MemoryIndex {
    async fn find(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<Option<IndexedContent>> {
        Ok(self.get(owner_id, content_type, content_id))
    }

    async fn upsert(&self, content: &IndexedContent) -> anyhow::Result<()> {
        self.insert(content.clone());
        Ok(())
    }

    async fn remove(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<bool> {
        let existed = self.get(owner_id, content_type, content_id).is_some();
        MemoryIndex::remove(self, owner_id, content_type, content_id);
        Ok(existed)
    }

    async fn remove_matching(
        &self,
        owner_id: Option<i64>,
        content_type: Option<&str>,
    ) -> anyhow::Result<u64> {
        Ok(self.remove_where(owner_id, content_type) as u64)
    }
}

/// What an extractor produces for one record.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub searchable_text: String,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub reference_date: Option<NaiveDate>,
}

type ExtractFn = fn(&Map<String, Value>) -> ExtractedContent;

struct ContentTypeDef {
    content_type: &'static str,
    table: &'static str,
    module: &'static str,
    kind: ContentKind,
    sensitivity: Sensitivity,
    extract: ExtractFn,
}

const CONTENT_TYPES: &[ContentTypeDef] = &[
    ContentTypeDef {
        content_type: "expense",
        table: "expenses_expense",
        module: "finance",
        kind: ContentKind::Finance,
        sensitivity: Sensitivity::Medium,
        extract: extract_expense,
    },
    ContentTypeDef {
        content_type: "revenue",
        table: "revenues_revenue",
        module: "finance",
        kind: ContentKind::Finance,
        sensitivity: Sensitivity::Medium,
        extract: extract_revenue,
    },
    ContentTypeDef {
        content_type: "account",
        table: "accounts_account",
        module: "finance",
        kind: ContentKind::Finance,
        sensitivity: Sensitivity::Medium,
        extract: extract_account,
    },
    ContentTypeDef {
        content_type: "creditcard",
        table: "credit_cards_creditcard",
        module: "finance",
        kind: ContentKind::Finance,
        sensitivity: Sensitivity::Medium,
        extract: extract_credit_card,
    },
    ContentTypeDef {
        content_type: "password",
        table: "security_password",
        module: "security",
        kind: ContentKind::Security,
        sensitivity: Sensitivity::High,
        extract: extract_password,
    },
    ContentTypeDef {
        content_type: "book",
        table: "library_book",
        module: "library",
        kind: ContentKind::Reading,
        sensitivity: Sensitivity::Low,
        extract: extract_book,
    },
    ContentTypeDef {
        content_type: "goal",
        table: "personal_planning_goal",
        module: "planning",
        kind: ContentKind::Planning,
        sensitivity: Sensitivity::Low,
        extract: extract_goal,
    },
    ContentTypeDef {
        content_type: "routinetask",
        table: "personal_planning_routinetask",
        module: "planning",
        kind: ContentKind::Planning,
        sensitivity: Sensitivity::Low,
        extract: extract_routine_task,
    },
    ContentTypeDef {
        content_type: "dailyreflection",
        table: "personal_planning_dailyreflection",
        module: "planning",
        kind: ContentKind::Planning,
        sensitivity: Sensitivity::Medium,
        extract: extract_daily_reflection,
    },
];

fn content_type_def(content_type: &str) -> Option<&'static ContentTypeDef> {
    CONTENT_TYPES.iter().find(|d| d.content_type == content_type)
}

// ============================================================
// Extractors
// ============================================================

fn text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn number(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    fields.get(name).and_then(Value::as_f64)
}

fn flag(fields: &Map<String, Value>, name: &str) -> Option<bool> {
    fields.get(name).and_then(Value::as_bool)
}

fn date(fields: &Map<String, Value>, name: &str) -> Option<NaiveDate> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Truncate on a character boundary.
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn extract_expense(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Expense: {}",
        text(fields, "description").unwrap_or_default()
    )];
    if let Some(value) = number(fields, "value") {
        parts.push(format!("Amount: {value:.2}"));
    }
    if let Some(d) = date(fields, "date") {
        parts.push(format!("Date: {d}"));
    }
    let category = text(fields, "category");
    if let Some(c) = &category {
        parts.push(format!("Category: {c}"));
    }
    if let Some(m) = text(fields, "payment_method") {
        parts.push(format!("Payment: {m}"));
    }
    if let Some(m) = text(fields, "merchant") {
        parts.push(format!("Merchant: {m}"));
    }
    if let Some(n) = text(fields, "notes") {
        parts.push(format!("Notes: {n}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: category.clone().map(|c| vec![c]).unwrap_or_default(),
        metadata: json!({
            "value": number(fields, "value"),
            "category": category,
            "payment_method": text(fields, "payment_method"),
        }),
        reference_date: date(fields, "date"),
    }
}

fn extract_revenue(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Revenue: {}",
        text(fields, "description").unwrap_or_default()
    )];
    if let Some(value) = number(fields, "value") {
        parts.push(format!("Amount: {value:.2}"));
    }
    if let Some(d) = date(fields, "date") {
        parts.push(format!("Date: {d}"));
    }
    let category = text(fields, "category");
    if let Some(c) = &category {
        parts.push(format!("Category: {c}"));
    }
    if let Some(s) = text(fields, "source") {
        parts.push(format!("Source: {s}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: category.clone().map(|c| vec![c]).unwrap_or_default(),
        metadata: json!({
            "value": number(fields, "value"),
            "category": category,
        }),
        reference_date: date(fields, "date"),
    }
}

fn extract_account(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Account: {}",
        text(fields, "account_name").unwrap_or_default()
    )];
    let account_type = text(fields, "account_type");
    if let Some(t) = &account_type {
        parts.push(format!("Type: {t}"));
    }
    if let Some(i) = text(fields, "institution_name") {
        parts.push(format!("Institution: {i}"));
    }
    if let Some(b) = number(fields, "current_balance") {
        parts.push(format!("Balance: {b:.2}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: account_type.clone().map(|t| vec![t]).unwrap_or_default(),
        metadata: json!({
            "account_type": account_type,
            "institution": text(fields, "institution_name"),
            "balance": number(fields, "current_balance"),
        }),
        reference_date: None,
    }
}

fn extract_credit_card(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Credit card: {}",
        text(fields, "name").unwrap_or_default()
    )];
    let network = text(fields, "flag");
    if let Some(f) = &network {
        parts.push(format!("Network: {f}"));
    }
    if let Some(l) = number(fields, "credit_limit") {
        parts.push(format!("Limit: {l:.2}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: network.clone().map(|f| vec![f]).unwrap_or_default(),
        metadata: json!({
            "flag": network,
            "credit_limit": number(fields, "credit_limit"),
        }),
        reference_date: None,
    }
}

/// The secret column never reaches this extractor; record sources skip
/// sensitive columns entirely. Only service metadata is indexed.
fn extract_password(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Password entry: {}",
        text(fields, "title").unwrap_or_default()
    )];
    if let Some(site) = text(fields, "site") {
        parts.push(format!("Site: {site}"));
    }
    if let Some(user) = text(fields, "username") {
        parts.push(format!("Username: {user}"));
    }
    let category = text(fields, "category");
    if let Some(c) = &category {
        parts.push(format!("Category: {c}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: vec!["password".to_string(), "credential".to_string()],
        metadata: json!({
            "site": text(fields, "site"),
            "category": category,
            "has_username": text(fields, "username").is_some(),
        }),
        reference_date: None,
    }
}

fn extract_book(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Book: {}",
        text(fields, "title").unwrap_or_default()
    )];
    let genre = text(fields, "genre");
    if let Some(g) = &genre {
        parts.push(format!("Genre: {g}"));
    }
    if let Some(p) = number(fields, "pages") {
        parts.push(format!("Pages: {p:.0}"));
    }
    if let Some(s) = text(fields, "synopsis") {
        parts.push(format!("Synopsis: {}", clip(&s, 200)));
    }

    let mut tags = Vec::new();
    if let Some(g) = &genre {
        tags.push(g.clone());
    }
    if let Some(status) = text(fields, "read_status") {
        tags.push(status);
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags,
        metadata: json!({
            "genre": genre,
            "pages": number(fields, "pages"),
            "rating": number(fields, "rating"),
            "read_status": text(fields, "read_status"),
        }),
        reference_date: None,
    }
}

fn extract_goal(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Goal: {}",
        text(fields, "title").unwrap_or_default()
    )];
    if let Some(d) = text(fields, "description") {
        parts.push(format!("Description: {d}"));
    }
    let goal_type = text(fields, "goal_type");
    if let Some(t) = &goal_type {
        parts.push(format!("Type: {t}"));
    }
    if let Some(s) = text(fields, "status") {
        parts.push(format!("Status: {s}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: goal_type.clone().map(|t| vec![t]).unwrap_or_default(),
        metadata: json!({
            "goal_type": goal_type,
            "status": text(fields, "status"),
        }),
        reference_date: date(fields, "start_date"),
    }
}

fn extract_routine_task(fields: &Map<String, Value>) -> ExtractedContent {
    let mut parts = vec![format!(
        "Task: {}",
        text(fields, "name").unwrap_or_default()
    )];
    if let Some(d) = text(fields, "description") {
        parts.push(format!("Description: {d}"));
    }
    let category = text(fields, "category");
    if let Some(c) = &category {
        parts.push(format!("Category: {c}"));
    }
    if let Some(p) = text(fields, "periodicity") {
        parts.push(format!("Periodicity: {p}"));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: category.clone().map(|c| vec![c]).unwrap_or_default(),
        metadata: json!({
            "category": category,
            "periodicity": text(fields, "periodicity"),
            "is_active": flag(fields, "is_active").unwrap_or(true),
        }),
        reference_date: None,
    }
}

fn extract_daily_reflection(fields: &Map<String, Value>) -> ExtractedContent {
    let day = date(fields, "date");
    let mut parts = vec![match day {
        Some(d) => format!("Reflection from {d}"),
        None => "Reflection".to_string(),
    }];
    let mood = text(fields, "mood");
    if let Some(m) = &mood {
        parts.push(format!("Mood: {m}"));
    }
    if let Some(r) = text(fields, "reflection") {
        parts.push(format!("Notes: {}", clip(&r, 500)));
    }

    ExtractedContent {
        searchable_text: parts.join(" | "),
        tags: mood.clone().map(|m| vec![m]).unwrap_or_default(),
        metadata: json!({ "mood": mood }),
        reference_date: day,
    }
}

// ============================================================
// Indexing service
// ============================================================

/// Totals for a bulk indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub indexed: usize,
    pub errors: usize,
}

pub struct IndexingService {
    source: Arc<dyn RecordSource>,
    writer: Arc<dyn ContentWriter>,
    embedder: Arc<dyn Embedder>,
}

impl IndexingService {
    pub fn new(
        source: Arc<dyn RecordSource>,
        writer: Arc<dyn ContentWriter>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            source,
            writer,
            embedder,
        }
    }

    /// Index one record. `force` regenerates an existing embedding;
    /// otherwise an already-indexed record is returned as-is. Unknown
    /// content types, missing records, and owner mismatches index
    /// nothing and return `None`.
    pub async fn index_single(
        &self,
        content_type: &str,
        content_id: i64,
        owner_id: i64,
        force: bool,
    ) -> anyhow::Result<Option<IndexedContent>> {
        let Some(def) = content_type_def(content_type) else {
            warn!(content_type, "unknown content type");
            return Ok(None);
        };

        let Some(record) = self.source.load(def.table, content_id).await? else {
            warn!(content_type, content_id, "record not found");
            return Ok(None);
        };
        if let Some(record_owner) = record.owner_id {
            if record_owner != owner_id {
                warn!(content_type, content_id, owner_id, "record belongs to a different owner");
                return Ok(None);
            }
        }

        if !force {
            if let Some(existing) = self.writer.find(owner_id, content_type, content_id).await? {
                if existing.is_indexed {
                    debug!(content_type, content_id, "already indexed");
                    return Ok(Some(existing));
                }
            }
        }

        let extracted = (def.extract)(&record.fields);
        let embedding = match self.embedder.embed(&extracted.searchable_text).await {
            Ok(v) => v,
            Err(e) => anyhow::bail!("embedding {content_type}:{content_id} failed: {e}"),
        };

        let content = IndexedContent {
            id: Uuid::new_v4(),
            owner_id,
            content_type: content_type.to_string(),
            content_id,
            kind: def.kind,
            sensitivity: def.sensitivity,
            searchable_text: extracted.searchable_text,
            embedding,
            metadata: extracted.metadata,
            tags: extracted.tags,
            reference_date: extracted.reference_date,
            is_indexed: true,
            indexed_at: Some(Utc::now()),
            embedding_model: self.embedder.model_name().to_string(),
        };
        self.writer.upsert(&content).await?;
        info!(content_type, content_id, owner_id, "indexed content");

        Ok(Some(content))
    }

    /// Index every live record of one module. Per-record failures are
    /// counted, not propagated.
    pub async fn index_module(
        &self,
        module: &str,
        owner_id: Option<i64>,
    ) -> anyhow::Result<IndexOutcome> {
        let defs: Vec<&ContentTypeDef> = CONTENT_TYPES
            .iter()
            .filter(|d| d.module == module)
            .collect();
        if defs.is_empty() {
            warn!(module, "unknown module");
            return Ok(IndexOutcome::default());
        }

        let mut outcome = IndexOutcome::default();
        for def in defs {
            let records = self.source.list(def.table, owner_id).await?;
            for record in records {
                let Some(record_owner) = record.owner_id else {
                    outcome.errors += 1;
                    continue;
                };
                match self
                    .index_single(def.content_type, record.content_id, record_owner, false)
                    .await
                {
                    Ok(Some(_)) => outcome.indexed += 1,
                    Ok(None) => outcome.errors += 1,
                    Err(e) => {
                        warn!(
                            content_type = def.content_type,
                            content_id = record.content_id,
                            error = %e,
                            "indexing failed"
                        );
                        outcome.errors += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Index every module.
    pub async fn index_all(&self, owner_id: Option<i64>) -> anyhow::Result<IndexOutcome> {
        let mut total = IndexOutcome::default();
        for module in MODULES {
            let outcome = self.index_module(module, owner_id).await?;
            info!(module, indexed = outcome.indexed, errors = outcome.errors, "module indexed");
            total.indexed += outcome.indexed;
            total.errors += outcome.errors;
        }
        Ok(total)
    }

    /// Drop one record's index entry, for when the source record goes
    /// away.
    pub async fn delete_content(
        &self,
        owner_id: i64,
        content_type: &str,
        content_id: i64,
    ) -> anyhow::Result<bool> {
        let removed = self.writer.remove(owner_id, content_type, content_id).await?;
        if removed {
            debug!(content_type, content_id, "index entry removed");
        }
        Ok(removed)
    }

    /// Remove index entries wholesale. Both scopes `None` clears the
    /// entire index.
    pub async fn clear(
        &self,
        owner_id: Option<i64>,
        content_type: Option<&str>,
    ) -> anyhow::Result<u64> {
        let removed = self.writer.remove_matching(owner_id, content_type).await?;
        info!(removed, "cleared index entries");
        Ok(removed)
    }
}
