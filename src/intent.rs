//! Intent classification: pick the execution strategy for a question.
//!
//! Pure keyword heuristics, no model calls. Aggregation, listing, and
//! trend vocabulary over a single recognizable domain reads as a
//! structured query; synthesis vocabulary, questions spanning multiple
//! domains, and short follow-ups read as semantic search. Never fails:
//! anything unmatched degrades to RAG with low confidence.

use crate::models::{ChatMessage, Complexity, ExecutionMode, QueryType};
use crate::prompts::{detect_module, detect_query_type, MODULE_INDICATORS};
use crate::sensitivity::classify_complexity;

/// Classification outcome consumed by the orchestrator.
#[derive(Debug, Clone)]
pub struct IntentResult {
    /// Detected domain module, or "general".
    pub module: String,
    pub intent_type: QueryType,
    pub execution_mode: ExecutionMode,
    /// Bounded heuristic score, not a probability.
    pub confidence: f32,
}

impl IntentResult {
    /// Whether the orchestrator should try the SQL path first.
    pub fn should_use_sql(&self) -> bool {
        matches!(
            self.execution_mode,
            ExecutionMode::Sql | ExecutionMode::Hybrid
        )
    }

    fn rag(module: &str, intent_type: QueryType, confidence: f32) -> Self {
        Self {
            module: module.to_string(),
            intent_type,
            execution_mode: ExecutionMode::Rag,
            confidence,
        }
    }
}

/// How many distinct domain modules the question touches.
fn matched_module_count(question_lower: &str) -> usize {
    MODULE_INDICATORS
        .iter()
        .filter(|(_, indicators)| indicators.iter().any(|kw| question_lower.contains(kw)))
        .count()
}

/// Classify a question into an execution mode.
///
/// `history` marks a conversational context: short follow-ups ("and on
/// travel?") cannot stand alone as SQL and go through RAG, where the
/// history is folded into the prompt.
pub fn classify(question: &str, history: Option<&[ChatMessage]>) -> IntentResult {
    let lower = question.to_lowercase();

    if classify_complexity(&lower) == Complexity::Greeting {
        return IntentResult::rag("general", QueryType::Lookup, 0.9);
    }

    let has_history = history.map(|h| !h.is_empty()).unwrap_or(false);
    if has_history && lower.split_whitespace().count() < 4 {
        return IntentResult::rag(detect_module(&lower), detect_query_type(&lower), 0.6);
    }

    let module = detect_module(&lower);
    let intent_type = detect_query_type(&lower);

    // Questions spanning several domains need synthesis, not one table.
    if matched_module_count(&lower) >= 2 {
        return IntentResult::rag(module, intent_type, 0.6);
    }

    if module == "general" {
        return IntentResult::rag(module, intent_type, 0.5);
    }

    match intent_type {
        QueryType::Aggregation => IntentResult {
            module: module.to_string(),
            intent_type,
            execution_mode: ExecutionMode::Sql,
            confidence: 0.85,
        },
        QueryType::Listing | QueryType::Trend => IntentResult {
            module: module.to_string(),
            intent_type,
            execution_mode: ExecutionMode::Sql,
            confidence: 0.75,
        },
        // Comparisons often mix a structured core with interpretation;
        // try SQL first and let the fallback carry the rest.
        QueryType::Comparison => IntentResult {
            module: module.to_string(),
            intent_type,
            execution_mode: ExecutionMode::Hybrid,
            confidence: 0.6,
        },
        QueryType::Lookup => IntentResult::rag(module, intent_type, 0.55),
    }
}
