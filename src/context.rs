//! Formats retrieval results into the context block handed to a
//! provider.
//!
//! The budget is character-based: `max_tokens` × 4 chars per token.
//! Entries are numbered, labeled by kind, and carry their metadata and
//! reference date; when the budget runs out mid-entry a partial entry
//! is kept only if a meaningful chunk of it fits.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::ContextConfig;
use crate::models::RetrievalResult;

const CHARS_PER_TOKEN: usize = 4;

/// Smallest partial entry worth keeping when the budget runs out.
const MIN_PARTIAL_CHARS: usize = 100;

/// Context block ready for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltContext {
    pub text: String,
    /// Estimated from length, not a real tokenizer count.
    pub token_count: usize,
    /// How many results made it into the block.
    pub result_count: usize,
    pub truncated: bool,
}

pub struct ContextBuilder {
    max_chars: usize,
}

impl ContextBuilder {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            max_chars: config.max_tokens * CHARS_PER_TOKEN,
        }
    }

    /// Build the context block, keeping whole entries while they fit.
    pub fn build(&self, results: &[RetrievalResult]) -> BuiltContext {
        if results.is_empty() {
            let text = "No relevant information found.".to_string();
            let token_count = text.len() / CHARS_PER_TOKEN;
            return BuiltContext {
                text,
                token_count,
                result_count: 0,
                truncated: false,
            };
        }

        let mut parts: Vec<String> = Vec::new();
        let mut total_chars = 0;
        let mut truncated = false;
        let mut included = 0;

        for (i, result) in results.iter().enumerate() {
            let entry = format_entry(result, i + 1);
            let entry_chars = entry.chars().count();

            if total_chars + entry_chars > self.max_chars {
                truncated = true;
                let remaining = self.max_chars - total_chars;
                if remaining > MIN_PARTIAL_CHARS {
                    parts.push(format!("{}...", clip(&entry, remaining)));
                    included += 1;
                }
                break;
            }

            parts.push(entry);
            total_chars += entry_chars;
            included += 1;
        }

        let text = parts.join("\n\n");
        let token_count = text.len() / CHARS_PER_TOKEN;

        BuiltContext {
            text,
            token_count,
            result_count: included,
            truncated,
        }
    }

    /// One-line count of results per kind, for logs.
    pub fn summary(&self, results: &[RetrievalResult]) -> String {
        if results.is_empty() {
            return "No results found.".to_string();
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for r in results {
            *counts.entry(r.content.kind.as_str()).or_insert(0) += 1;
        }

        let parts: Vec<String> = counts
            .iter()
            .map(|(kind, count)| format!("{count} result(s) from {kind}"))
            .collect();
        format!("Found: {}", parts.join(", "))
    }
}

fn format_entry(result: &RetrievalResult, index: usize) -> String {
    let content = &result.content;
    let mut lines = vec![format!(
        "[{index}. {} - {}]",
        content.kind.label().to_uppercase(),
        content.content_type
    )];

    lines.push(content.searchable_text.clone());

    if let Some(line) = metadata_line(&content.metadata) {
        lines.push(line);
    }

    if let Some(date) = content.reference_date {
        lines.push(format!("  Date: {date}"));
    }

    lines.join("\n")
}

/// Render metadata as a parenthesized key-value line. Identity keys and
/// nulls are skipped; floats get two decimals.
fn metadata_line(metadata: &Value) -> Option<String> {
    let map = metadata.as_object()?;

    let mut parts: Vec<String> = Vec::new();
    for (key, value) in map {
        if key == "id" || key == "uuid" {
            continue;
        }
        match value {
            Value::Null => {}
            Value::Number(n) if n.is_f64() => {
                parts.push(format!("{key}: {:.2}", n.as_f64().unwrap_or(0.0)));
            }
            Value::String(s) => parts.push(format!("{key}: {s}")),
            other => parts.push(format!("{key}: {other}")),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("  ({})", parts.join(", ")))
    }
}

/// Truncate on a character boundary.
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
