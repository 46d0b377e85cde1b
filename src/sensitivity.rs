//! Sensitivity analysis for provider routing.
//!
//! Looks at both the question and the retrieved context to decide whether
//! the request may leave the host. The rules are ordered: privacy rules
//! first, the single cloud-permitting rule near the end, and a
//! local-by-default fallback.

use crate::models::{Complexity, ContentKind, RetrievalResult, Sensitivity};

/// Keywords suggesting multi-step reasoning or analysis.
const COMPLEX_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "explain",
    "why",
    "difference",
    "summarize",
    "synthesize",
    "evaluate",
    "how much did i spend",
    "total",
    "sum",
    "average",
    "trend",
    "forecast",
    "plan",
    "suggest",
    "recommend",
];

/// Keywords suggesting a direct factual answer.
const SIMPLE_KEYWORDS: &[&str] = &[
    "what",
    "which",
    "when",
    "where",
    "who",
    "is there",
    "do i have",
    "show",
    "list",
];

/// Vocabulary that forces local inference when it appears in the
/// question, regardless of what was retrieved.
const SECURITY_KEYWORDS: &[&str] = &[
    "password",
    "passwords",
    "credential",
    "login",
    "username",
    "card",
    "cvv",
    "code",
    "security",
    "secret",
    "private",
    "vault",
];

/// Single-word greetings, matched as whole words so "hi" does not fire
/// inside "this".
const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "yo", "thanks", "thx", "bye", "goodbye", "help",
];

/// Multi-word greeting phrases, matched as substrings.
const GREETING_PHRASES: &[&str] = &[
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "what's up",
    "whats up",
    "thank you",
    "see you",
    "what can you do",
    "who are you",
    "can you help",
    "help me",
];

/// Everything the router needs to pick a provider.
#[derive(Debug, Clone)]
pub struct SensitivityAnalysis {
    pub max_sensitivity: Sensitivity,
    pub has_restricted_content: bool,
    pub complexity: Complexity,
    pub requires_local: bool,
    pub reason: &'static str,
}

/// Analyze a question and its retrieved context for routing.
pub fn analyze(query: &str, results: &[RetrievalResult]) -> SensitivityAnalysis {
    let query_lower = query.to_lowercase();

    let max_sensitivity = max_sensitivity(results);
    let has_restricted = has_restricted_content(results);
    let complexity = classify_complexity(&query_lower);
    let mentions_security = mentions_security(&query_lower);

    let (requires_local, reason) = should_use_local(
        max_sensitivity,
        has_restricted,
        mentions_security,
        complexity,
    );

    SensitivityAnalysis {
        max_sensitivity,
        has_restricted_content: has_restricted,
        complexity,
        requires_local,
        reason,
    }
}

/// Highest sensitivity across results; `Low` for an empty set.
pub fn max_sensitivity(results: &[RetrievalResult]) -> Sensitivity {
    results
        .iter()
        .map(|r| r.content.sensitivity)
        .max()
        .unwrap_or(Sensitivity::Low)
}

fn has_restricted_content(results: &[RetrievalResult]) -> bool {
    results
        .iter()
        .any(|r| r.content.kind == ContentKind::Security)
}

fn mentions_security(query_lower: &str) -> bool {
    SECURITY_KEYWORDS.iter().any(|kw| query_lower.contains(kw))
}

/// Classify question complexity from keyword density and length.
pub fn classify_complexity(query_lower: &str) -> Complexity {
    if is_greeting(query_lower) {
        return Complexity::Greeting;
    }

    let complex_count = COMPLEX_KEYWORDS
        .iter()
        .filter(|kw| query_lower.contains(*kw))
        .count();
    let simple_count = SIMPLE_KEYWORDS
        .iter()
        .filter(|kw| query_lower.contains(*kw))
        .count();
    let word_count = query_lower.split_whitespace().count();

    if complex_count >= 2 || (complex_count >= 1 && word_count > 15) {
        Complexity::Complex
    } else if simple_count >= 1 && word_count < 10 {
        Complexity::Simple
    } else {
        Complexity::Moderate
    }
}

fn is_greeting(query_lower: &str) -> bool {
    let clean = query_lower.trim();
    let words: Vec<&str> = clean.split_whitespace().collect();
    if words.is_empty() || words.len() > 5 {
        return false;
    }
    let word_hit = words.iter().any(|w| {
        let stripped = w.trim_matches(|c: char| !c.is_alphanumeric());
        GREETING_WORDS.contains(&stripped)
    });
    word_hit || GREETING_PHRASES.iter().any(|p| clean.contains(p))
}

/// The routing rules, in priority order. Returns whether local inference
/// is required plus the reason recorded in the response metadata.
fn should_use_local(
    max_sensitivity: Sensitivity,
    has_restricted: bool,
    mentions_security: bool,
    complexity: Complexity,
) -> (bool, &'static str) {
    // Rule 1: high sensitivity never leaves the host.
    if max_sensitivity == Sensitivity::High {
        return (true, "high sensitivity data detected");
    }

    // Rule 2: restricted-category content never leaves the host.
    if has_restricted {
        return (true, "security module content detected");
    }

    // Rule 3: security vocabulary in the question itself.
    if mentions_security {
        return (true, "question mentions security topics");
    }

    // Rule 4: medium sensitivity with a simple question stays local.
    if max_sensitivity == Sensitivity::Medium && complexity == Complexity::Simple {
        return (true, "medium sensitivity with a simple question");
    }

    // Rule 5: the only cloud-permitting rule.
    if complexity == Complexity::Complex && max_sensitivity == Sensitivity::Low {
        return (false, "complex question over low-sensitivity data");
    }

    (true, "default privacy preference")
}
