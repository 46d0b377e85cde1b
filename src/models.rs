//! Core data types shared across the pipeline.
//!
//! These types represent indexed content, retrieval matches, SQL results,
//! and the response envelope that flows out of the chat service.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How private a piece of indexed content is. Variants are declared lowest
/// to highest so `Ord` gives the privacy-correct maximum over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Sensitivity::Low),
            "medium" => Some(Sensitivity::Medium),
            "high" => Some(Sensitivity::High),
            _ => None,
        }
    }
}

/// Content category. `Security` is the restricted category: its presence
/// anywhere in a result set forces local inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Finance,
    Security,
    Planning,
    Reading,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Finance => "finance",
            ContentKind::Security => "security",
            ContentKind::Planning => "planning",
            ContentKind::Reading => "reading",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "finance" => Some(ContentKind::Finance),
            "security" => Some(ContentKind::Security),
            "planning" => Some(ContentKind::Planning),
            "reading" => Some(ContentKind::Reading),
            _ => None,
        }
    }

    /// Human-readable label used in context blocks.
    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::Finance => "Finance",
            ContentKind::Security => "Security",
            ContentKind::Planning => "Planning",
            ContentKind::Reading => "Library",
        }
    }
}

/// Question complexity, derived from keyword density and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Greeting,
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Greeting => "greeting",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// Which execution strategy answers the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sql,
    Rag,
    Hybrid,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sql => "sql",
            ExecutionMode::Rag => "rag",
            ExecutionMode::Hybrid => "hybrid",
        }
    }
}

/// Shape of the question as seen by the SQL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Aggregation,
    Listing,
    Trend,
    Comparison,
    Lookup,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Aggregation => "aggregation",
            QueryType::Listing => "listing",
            QueryType::Trend => "trend",
            QueryType::Comparison => "comparison",
            QueryType::Lookup => "lookup",
        }
    }
}

/// Final provider choice for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingDecision {
    Local,
    Remote,
    None,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::Local => "local",
            RoutingDecision::Remote => "remote",
            RoutingDecision::None => "none",
        }
    }
}

/// One embedding record per domain entity instance.
///
/// Created and updated only by the indexing path; retrieval never mutates
/// it. For the security kind, neither `searchable_text` nor `metadata`
/// ever contains the secret value itself.
#[derive(Debug, Clone)]
pub struct IndexedContent {
    pub id: Uuid,
    pub owner_id: i64,
    /// Entity type tag, e.g. "expense", "book", "password".
    pub content_type: String,
    /// Source entity id in its own table.
    pub content_id: i64,
    pub kind: ContentKind,
    pub sensitivity: Sensitivity,
    /// Free-text rendering used for embedding and context building.
    pub searchable_text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub reference_date: Option<NaiveDate>,
    pub is_indexed: bool,
    pub indexed_at: Option<DateTime<Utc>>,
    pub embedding_model: String,
}

/// One retrieval match: a content record plus its similarity to the query.
///
/// `score` and `distance` are redundant by construction; both are kept
/// because callers consume whichever reads better.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub content: IndexedContent,
    pub score: f32,
    pub distance: f32,
}

impl RetrievalResult {
    /// Builds a result from a cosine distance, deriving the score so
    /// `score = 1 - distance` holds exactly.
    pub fn from_distance(content: IndexedContent, distance: f32) -> Self {
        Self {
            content,
            score: 1.0 - distance,
            distance,
        }
    }

    /// Source attribution carried in `ChatResponse::sources`.
    pub fn to_source(&self) -> serde_json::Value {
        serde_json::json!({
            "content_type": self.content.content_type,
            "content_id": self.content.content_id,
            "kind": self.content.kind.as_str(),
            "sensitivity": self.content.sensitivity.as_str(),
            "text": self.content.searchable_text,
            "score": (self.score * 10_000.0).round() / 10_000.0,
            "reference_date": self.content.reference_date.map(|d| d.to_string()),
            "metadata": self.content.metadata,
        })
    }
}

/// Why a request went to the provider it did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub max_sensitivity: Sensitivity,
    pub has_restricted_content: bool,
    pub complexity: Complexity,
    pub decision: RoutingDecision,
    pub provider_name: String,
    pub reason: String,
}

/// Output of the SQL generator, before validation.
#[derive(Debug, Clone)]
pub struct SqlGenerationResult {
    pub sql: String,
    pub query_type: QueryType,
    /// Detected domain module ("finance", "library", "security",
    /// "planning", or "general").
    pub module: String,
    pub tables: Vec<String>,
    pub explanation: String,
    /// Heuristic in [0, 0.95]; not a calibrated probability.
    pub confidence: f32,
}

/// Tabular result of an executed statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// True iff more rows existed than the configured maximum.
    pub truncated: bool,
    pub execution_time_ms: f64,
    pub sql: String,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub fn to_objects(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }
}

/// Text produced by an inference provider, with accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    pub model: String,
    pub provider: String,
    pub tokens_used: Option<u32>,
    pub duration_ms: u64,
}

/// One prior message when the caller supplies conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// Conjunctive retrieval filters. Empty fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilter {
    #[serde(default)]
    pub kinds: Vec<ContentKind>,
    #[serde(default)]
    pub sensitivities: Vec<Sensitivity>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

impl RetrievalFilter {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.sensitivities.is_empty()
            && self.tags.is_empty()
            && self.content_types.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// Deterministic rendering for cache-key hashing: field names in a
    /// fixed order, values sorted, empty fields omitted.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.content_types.is_empty() {
            let mut v = self.content_types.clone();
            v.sort();
            parts.push(format!("content_types={}", v.join(",")));
        }
        if let Some(d) = self.date_from {
            parts.push(format!("date_from={}", d));
        }
        if let Some(d) = self.date_to {
            parts.push(format!("date_to={}", d));
        }
        if !self.kinds.is_empty() {
            let mut v: Vec<&str> = self.kinds.iter().map(|k| k.as_str()).collect();
            v.sort();
            parts.push(format!("kinds={}", v.join(",")));
        }
        if !self.sensitivities.is_empty() {
            let mut v: Vec<&str> = self.sensitivities.iter().map(|s| s.as_str()).collect();
            v.sort();
            parts.push(format!("sensitivities={}", v.join(",")));
        }
        if !self.tags.is_empty() {
            let mut v = self.tags.clone();
            v.sort();
            parts.push(format!("tags={}", v.join(",")));
        }
        parts.join(";")
    }
}

/// The response envelope: everything a caller needs to render an answer,
/// attribute sources, and audit the routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    /// Source attributions; always empty in SQL mode.
    pub sources: Vec<serde_json::Value>,
    pub routing_decision: String,
    pub provider: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub execution_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_rows: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(kind: ContentKind, sensitivity: Sensitivity) -> IndexedContent {
        IndexedContent {
            id: Uuid::new_v4(),
            owner_id: 1,
            content_type: "expense".to_string(),
            content_id: 10,
            kind,
            sensitivity,
            searchable_text: "Groceries at the market".to_string(),
            embedding: vec![0.1, 0.2, 0.3],
            metadata: serde_json::json!({}),
            tags: vec![],
            reference_date: None,
            is_indexed: true,
            indexed_at: Some(Utc::now()),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
        }
    }

    #[test]
    fn test_sensitivity_ordering() {
        assert!(Sensitivity::Low < Sensitivity::Medium);
        assert!(Sensitivity::Medium < Sensitivity::High);
        let max = [Sensitivity::Medium, Sensitivity::Low, Sensitivity::High]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(max, Sensitivity::High);
    }

    #[test]
    fn test_sensitivity_parse_roundtrip() {
        for s in [Sensitivity::Low, Sensitivity::Medium, Sensitivity::High] {
            assert_eq!(Sensitivity::parse(s.as_str()), Some(s));
        }
        assert_eq!(Sensitivity::parse("urgent"), None);
    }

    #[test]
    fn test_score_is_one_minus_distance() {
        let r =
            RetrievalResult::from_distance(content(ContentKind::Finance, Sensitivity::Low), 0.25);
        assert_eq!(r.score, 1.0 - r.distance);
        assert_eq!(r.score, 0.75);

        // Holds at the extremes of the cosine distance range too.
        let r =
            RetrievalResult::from_distance(content(ContentKind::Finance, Sensitivity::Low), 0.0);
        assert_eq!(r.score, 1.0);
        let r =
            RetrievalResult::from_distance(content(ContentKind::Finance, Sensitivity::Low), 2.0);
        assert_eq!(r.score, -1.0);
    }

    #[test]
    fn test_filter_signature_is_order_independent() {
        let a = RetrievalFilter {
            kinds: vec![ContentKind::Finance, ContentKind::Planning],
            tags: vec!["b".to_string(), "a".to_string()],
            ..Default::default()
        };
        let b = RetrievalFilter {
            kinds: vec![ContentKind::Planning, ContentKind::Finance],
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(a.signature(), b.signature());
        assert!(!a.signature().is_empty());
        assert_eq!(RetrievalFilter::default().signature(), "");
    }

    #[test]
    fn test_query_result_to_objects() {
        let result = QueryResult {
            columns: vec!["name".to_string(), "total".to_string()],
            rows: vec![vec![
                serde_json::json!("groceries"),
                serde_json::json!(412.5),
            ]],
            row_count: 1,
            truncated: false,
            execution_time_ms: 4.2,
            sql: "SELECT 1".to_string(),
        };
        let objects = result.to_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["name"], "groceries");
        assert_eq!(objects[0]["total"], 412.5);
    }

    #[test]
    fn test_chat_response_roundtrips_through_json() {
        let response = ChatResponse {
            answer: "You spent 412.50 this month.".to_string(),
            sources: vec![],
            routing_decision: "local".to_string(),
            provider: "ollama".to_string(),
            cached: false,
            cache_type: None,
            similarity: None,
            execution_mode: "rag".to_string(),
            sql_query: None,
            sql_explanation: None,
            data_rows: None,
            visualization: None,
            metadata: serde_json::json!({"result_count": 3}),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: ChatResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.answer, response.answer);
        assert_eq!(decoded.metadata["result_count"], 3);
        assert!(decoded.sql_query.is_none());
    }
}
