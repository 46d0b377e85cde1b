//! Prompt templates and lightweight question classification.
//!
//! Prompt text lives here so the generator, router, and formatter share
//! one source of truth. Classification is keyword-based on purpose: it
//! runs on every request and must never call a model.

use chrono::{Datelike, Local};

use crate::models::QueryType;

/// Date block injected into the SQL system prompt so relative periods
/// ("this month", "last year") resolve correctly.
pub fn current_date_context() -> String {
    let today = Local::now().date_naive();
    format!(
        "CURRENT DATE: {}\nCURRENT YEAR: {}\nCURRENT MONTH: {}\nCURRENT DAY: {}",
        today.format("%Y-%m-%d"),
        today.year(),
        today.month(),
        today.day()
    )
}

/// System prompt for SQL generation. `schema_block` comes from
/// [`crate::schema::SchemaCatalog::prompt_block`].
pub fn sql_system_prompt(schema_block: &str) -> String {
    format!(
        r#"You are a PostgreSQL expert for a personal data system.
Your task is to produce safe, precise SQL from natural-language questions.

{date_context}

## CRITICAL SAFETY RULES

1. **SELECT ONLY**: never produce INSERT, UPDATE, DELETE, DROP, CREATE, ALTER, TRUNCATE, GRANT, or REVOKE
2. **SOFT DELETE**: always include `deleted_at IS NULL` for tables that soft-delete
3. **OWNER FILTER**: the owner filter is injected automatically - do NOT include it in the query
4. **NO SENSITIVE FIELDS**: never select columns starting with underscore (_password, _card_number, ...)
5. **NO DEFAULT LIMIT**: do not add LIMIT unless the user explicitly asks for it

## FORMATTING RULES

1. Use PostgreSQL table names (snake_case): `expenses_expense`, `library_book`, ...
2. Dates in ISO format: 'YYYY-MM-DD'
3. For periods:
   - "this month" = >= first day of the current month AND < first day of next month
   - "January" = the January of the current year
   - "last month" = the month before the current one
   - "this year" = >= first day of the current year
4. For monetary aggregations use SUM(value)
5. For temporal grouping use DATE_TRUNC('month', date) or DATE_TRUNC('day', date)

## DATABASE SCHEMA

{schema}

## EXAMPLE QUERIES

Question: "How much did I spend this month?"
```sql
SELECT SUM(value) AS total
FROM expenses_expense
WHERE date >= DATE_TRUNC('month', CURRENT_DATE)
  AND date < DATE_TRUNC('month', CURRENT_DATE) + INTERVAL '1 month'
  AND deleted_at IS NULL
```

Question: "Expenses by category this month"
```sql
SELECT category, SUM(value) AS total, COUNT(*) AS entries
FROM expenses_expense
WHERE date >= DATE_TRUNC('month', CURRENT_DATE)
  AND date < DATE_TRUNC('month', CURRENT_DATE) + INTERVAL '1 month'
  AND deleted_at IS NULL
GROUP BY category
ORDER BY total DESC
```

Question: "Monthly evolution of my expenses"
```sql
SELECT DATE_TRUNC('month', date) AS month, SUM(value) AS total
FROM expenses_expense
WHERE date >= DATE_TRUNC('year', CURRENT_DATE)
  AND deleted_at IS NULL
GROUP BY DATE_TRUNC('month', date)
ORDER BY month
```

Question: "How much did I earn this month?"
```sql
SELECT SUM(value) AS total
FROM revenues_revenue
WHERE date >= DATE_TRUNC('month', CURRENT_DATE)
  AND date < DATE_TRUNC('month', CURRENT_DATE) + INTERVAL '1 month'
  AND deleted_at IS NULL
```

Question: "Which books am I reading?"
```sql
SELECT title, pages, genre, rating
FROM library_book
WHERE read_status = 'reading'
  AND deleted_at IS NULL
ORDER BY updated_at DESC
```

Question: "How many pages did I read today?"
```sql
SELECT SUM(pages_read) AS total_pages, SUM(reading_time) AS total_minutes
FROM library_reading
WHERE reading_date = CURRENT_DATE
  AND deleted_at IS NULL
```

Question: "My account balances"
```sql
SELECT account_name, institution_name, current_balance, account_type
FROM accounts_account
WHERE is_active = true
  AND deleted_at IS NULL
ORDER BY current_balance DESC
```

Question: "My active goals"
```sql
SELECT title, goal_type, target_value, current_value, start_date, status
FROM personal_planning_goal
WHERE status = 'active'
  AND deleted_at IS NULL
ORDER BY start_date DESC
```

Question: "Today's tasks"
```sql
SELECT task_name, category, scheduled_time, status, target_quantity, quantity_completed
FROM personal_planning_taskinstance
WHERE scheduled_date = CURRENT_DATE
  AND deleted_at IS NULL
ORDER BY scheduled_time NULLS LAST
```

Question: "Active loans"
```sql
SELECT description, value, payed_value, (value - payed_value) AS outstanding,
       date, due_date, status
FROM loans_loan
WHERE status = 'active'
  AND deleted_at IS NULL
ORDER BY due_date NULLS LAST
```

Question: "My saved passwords"
```sql
SELECT title, site, username, category, last_password_change
FROM security_password
WHERE deleted_at IS NULL
ORDER BY title
```

## RESPONSE FORMAT

Answer ONLY with the SQL, no extra explanation. The SQL must:
1. Be valid PostgreSQL
2. Be ready to execute (no placeholders)
3. Use descriptive aliases for computed columns
4. Use JOINs when related information is needed"#,
        date_context = current_date_context(),
        schema = schema_block,
    )
}

/// Prompt asking the model to summarize executed SQL results.
pub fn sql_answer_prompt(question: &str, sql: &str, results_text: &str, row_count: usize) -> String {
    format!(
        r#"You are a personal data assistant. Based on the SQL query results
below, write a clear, informative answer.

## RULES

1. **Accuracy**: use ONLY the returned data - never invent or fill in missing values
2. **Value formatting**: money with two decimals, dates as YYYY-MM-DD
3. **Structure**: start with a direct answer to the question, then list the
   relevant data, including totals when applicable
4. **No results**: if the result set is empty, say clearly that no data was found
5. **Markdown**: use markdown formatting for readability

## QUERY DATA

User question: {question}

Executed SQL:
```sql
{sql}
```

Result ({row_count} row(s)):
{results_text}

Now write the answer:"#
    )
}

/// System prompt for RAG answers over retrieved personal data.
pub fn rag_system_prompt() -> &'static str {
    "You are a personal data assistant. You answer questions about the \
     user's own data: finances, reading, planning, and credentials metadata.\n\
     Your answers must be:\n\
     - Natural and conversational\n\
     - Concise but informative\n\
     - Grounded ONLY in the provided context, never invented\n\
     Format money with two decimals and dates as YYYY-MM-DD.\n\
     Never reveal stored secrets; for credentials, confirm the entry exists \
     and point the user to the security module.\n\
     If the context does not contain the answer, say so plainly."
}

/// User prompt for RAG generation, with optional conversation history
/// folded in ahead of the current question.
pub fn rag_user_prompt(
    question: &str,
    context_text: &str,
    history: Option<&[crate::models::ChatMessage]>,
) -> String {
    let mut prompt = String::new();

    if let Some(messages) = history {
        if !messages.is_empty() {
            prompt.push_str("<history>\n");
            for m in messages {
                prompt.push_str(&format!("{}: {}\n", m.role, m.content));
            }
            prompt.push_str("</history>\n\n");
        }
    }

    prompt.push_str(&format!(
        "<context>\n{context_text}\n</context>\n\n\
         <question>\n{question}\n</question>\n\n\
         <instruction>\n\
         Answer the question using only the context above. \
         If the context is insufficient, say you could not find the information.\n\
         </instruction>"
    ));

    prompt
}

// ============ Question classification ============

/// Keyword tables checked in priority order; the first category with a
/// match wins.
pub const QUERY_TYPE_INDICATORS: &[(QueryType, &[&str])] = &[
    (
        QueryType::Aggregation,
        &[
            "total", "how much", "how many", "sum", "average", "highest", "largest", "biggest",
            "lowest", "smallest", "count", "avg", "max", "min",
        ],
    ),
    (
        QueryType::Listing,
        &[
            "list", "show", "display", "which", "latest", "recent", "every",
        ],
    ),
    (
        QueryType::Trend,
        &[
            "evolution", "history", "trend", "over time", "per month", "monthly", "weekly",
            "daily", "timeline",
        ],
    ),
    (
        QueryType::Comparison,
        &["compare", "comparison", "versus", "vs", "difference", "between"],
    ),
    (
        QueryType::Lookup,
        &[
            "what", "where", "when", "who", "how", "find", "search", "look up",
        ],
    ),
];

/// Detect the shape of the question. Defaults to lookup.
pub fn detect_query_type(question: &str) -> QueryType {
    let lower = question.to_lowercase();
    for (query_type, indicators) in QUERY_TYPE_INDICATORS {
        if indicators.iter().any(|kw| lower.contains(kw)) {
            return *query_type;
        }
    }
    QueryType::Lookup
}

/// Domain keyword tables, checked in order.
pub const MODULE_INDICATORS: &[(&str, &[&str])] = &[
    (
        "finance",
        &[
            "expense", "spent", "spend", "spending", "cost", "revenue", "earned", "income",
            "salary", "account", "balance", "bank", "card", "credit", "bill", "transfer", "pix",
            "loan", "owe", "debt",
        ],
    ),
    (
        "library",
        &[
            "book", "reading", "read", "page", "author", "publisher", "genre", "summary",
            "library",
        ],
    ),
    (
        "security",
        &[
            "password", "credential", "login", "username", "vault", "secret",
        ],
    ),
    (
        "planning",
        &[
            "goal", "task", "habit", "routine", "reflection", "mood", "planning", "schedule",
        ],
    ),
];

/// Detect which domain module the question is about. Defaults to
/// "general" when nothing matches.
pub fn detect_module(question: &str) -> &'static str {
    let lower = question.to_lowercase();
    for (module, indicators) in MODULE_INDICATORS {
        if indicators.iter().any(|kw| lower.contains(kw)) {
            return module;
        }
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_query_type_priority_order() {
        // "how much" matches aggregation before lookup sees "how".
        assert_eq!(
            detect_query_type("How much did I spend this month?"),
            QueryType::Aggregation
        );
        assert_eq!(
            detect_query_type("Show my latest expenses"),
            QueryType::Listing
        );
        assert_eq!(
            detect_query_type("Evolution of spending per quarter"),
            QueryType::Trend
        );
    }

    #[test]
    fn test_detect_query_type_defaults_to_lookup() {
        assert_eq!(detect_query_type("groceries maybe"), QueryType::Lookup);
    }

    #[test]
    fn test_detect_module() {
        assert_eq!(detect_module("how much did I spend on groceries"), "finance");
        assert_eq!(detect_module("which books am I reading"), "library");
        assert_eq!(detect_module("when did I change my netflix password"), "security");
        assert_eq!(detect_module("my active goals"), "planning");
        assert_eq!(detect_module("hello there"), "general");
    }

    #[test]
    fn test_sql_system_prompt_embeds_schema_and_date() {
        let prompt = sql_system_prompt("# DATABASE SCHEMA\n\n## expenses_expense");
        assert!(prompt.contains("## expenses_expense"));
        assert!(prompt.contains("CURRENT DATE:"));
        assert!(prompt.contains("SELECT ONLY"));
        assert!(prompt.contains("do NOT include it in the query"));
    }

    #[test]
    fn test_rag_user_prompt_includes_history_when_present() {
        let history = vec![
            crate::models::ChatMessage {
                role: "user".to_string(),
                content: "what did I spend on pets?".to_string(),
            },
            crate::models::ChatMessage {
                role: "assistant".to_string(),
                content: "You spent 80.00 on pets.".to_string(),
            },
        ];
        let with = rag_user_prompt("and on travel?", "ctx", Some(&history));
        assert!(with.contains("<history>"));
        assert!(with.contains("what did I spend on pets?"));

        let without = rag_user_prompt("and on travel?", "ctx", None);
        assert!(!without.contains("<history>"));
        assert!(without.contains("<context>\nctx\n</context>"));
    }
}
