//! SQL safety validation and rewriting.
//!
//! The generator's output is never trusted. The validator re-parses the
//! statement, rejects anything that is not a single read-only query over
//! known tables, and rewrites it to carry an owner-scoping predicate and
//! a hard row cap. The model is never shown the caller id, so tenant
//! isolation lives here and nowhere else.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::ValidationError;
use crate::schema::{catalog, is_sensitive_column};

static FORBIDDEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|create|alter|truncate|grant|revoke|execute|exec|call|merge|copy|into|vacuum|prepare|lock)\b",
    )
    .expect("static regex")
});
static TABLE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\w+)").expect("static regex"));
static ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s+(?:AS\s+)?([A-Za-z_]\w*)").expect("static regex"));
static CTE_HEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bWITH\s+(?:RECURSIVE\s+)?(\w+)\s+AS\s*\(").expect("static regex")
});
static CTE_CHAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),\s*(\w+)\s+AS\s*\(").expect("static regex"));
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("static regex"));
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("static regex"));
static FUNCTION_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:EXTRACT|SUBSTRING|TRIM|POSITION|OVERLAY)\s*\([^()]*\)")
        .expect("static regex")
});

/// Words that follow a table name without being an alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "ON", "JOIN", "INNER", "LEFT",
    "RIGHT", "FULL", "CROSS", "NATURAL", "UNION", "EXCEPT", "INTERSECT", "USING", "WINDOW", "AS",
];

/// A validated statement plus anything worth surfacing about the
/// rewrite.
#[derive(Debug, Clone)]
pub struct SanitizedSql {
    pub sql: String,
    pub warnings: Vec<String>,
}

pub struct SqlValidator {
    max_rows: usize,
}

impl SqlValidator {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// Full validation pipeline. Rejections run before rewrites: write
    /// keywords first, then unknown tables, then sensitive columns.
    pub fn validate(&self, sql: &str, owner_id: i64) -> Result<SanitizedSql, ValidationError> {
        let statement = normalize(sql)?;

        if let Some(keyword) = find_forbidden_keyword(&statement) {
            return Err(ValidationError::ForbiddenKeyword(keyword));
        }

        let upper = statement.to_uppercase();
        if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
            return Err(ValidationError::Unparseable(
                "statement must start with SELECT or WITH".to_string(),
            ));
        }

        let refs = table_refs(&statement);
        if refs.is_empty() {
            // Nothing to scope means nothing we can safely run.
            return Err(ValidationError::Unparseable(
                "no table reference found".to_string(),
            ));
        }

        for r in &refs {
            if !catalog().is_known_table(&r.table) {
                return Err(ValidationError::UnknownTable(r.table.clone()));
            }
        }

        if let Some(column) = find_sensitive_column(&statement) {
            return Err(ValidationError::SensitiveColumn(column));
        }

        let mut sanitized = statement;
        let mut warnings: Vec<String> = Vec::new();

        // Rightmost reference first, so earlier insertions never shift a
        // position we still have to process.
        let mut ordered = refs;
        ordered.sort_by(|a, b| b.position.cmp(&a.position));

        for r in &ordered {
            let qualifier = r.alias.as_deref().unwrap_or(&r.table);
            match owner_predicate(&r.table, qualifier, owner_id) {
                Some(predicate) => {
                    inject_predicate(&mut sanitized, r.position, &predicate);
                }
                None => {
                    let warning = format!(
                        "table {} holds shared household data; no owner predicate applied",
                        r.table
                    );
                    if !warnings.contains(&warning) {
                        warnings.push(warning);
                    }
                }
            }
        }

        if !LIMIT_RE.is_match(&sanitized) {
            sanitized.push_str(&format!(" LIMIT {}", self.max_rows));
        }

        debug!(owner_id, warnings = warnings.len(), "statement sanitized");

        Ok(SanitizedSql {
            sql: sanitized,
            warnings,
        })
    }
}

/// Trim, strip trailing semicolons, and reject anything that still
/// carries a statement separator.
fn normalize(sql: &str) -> Result<String, ValidationError> {
    let statement = sql.trim().trim_end_matches(';').trim_end();

    if statement.is_empty() {
        return Err(ValidationError::Unparseable("empty statement".to_string()));
    }
    if statement.contains(';') {
        return Err(ValidationError::Unparseable(
            "multiple statements".to_string(),
        ));
    }

    Ok(statement.to_string())
}

/// First write/DDL keyword anywhere in the text, uppercased for the
/// error message. Word boundaries keep audit columns like `deleted_at`
/// and `created_at` from tripping the scan.
fn find_forbidden_keyword(sql: &str) -> Option<String> {
    FORBIDDEN_RE.find(sql).map(|m| m.as_str().to_uppercase())
}

/// Names introduced by WITH clauses. They appear after FROM like table
/// names but resolve inside the statement itself.
fn cte_names(sql: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for captures in CTE_HEAD_RE.captures_iter(sql) {
        names.insert(captures[1].to_lowercase());
    }
    for captures in CTE_CHAIN_RE.captures_iter(sql) {
        names.insert(captures[1].to_lowercase());
    }
    names
}

/// Blank out function bodies that legally contain the FROM keyword,
/// such as `EXTRACT(MONTH FROM date)`, so reference collection does not
/// mistake their arguments for table names. Replacement is
/// space-for-byte, keeping every offset valid against the original.
fn mask_function_from(sql: &str) -> String {
    FUNCTION_FROM_RE
        .replace_all(sql, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}

#[derive(Debug)]
struct TableRef {
    /// Byte offset of the table name in the statement.
    position: usize,
    table: String,
    alias: Option<String>,
}

/// Every FROM/JOIN reference with its position and trailing alias, CTE
/// names excluded. Each reference is scoped independently, so a
/// self-join gets one predicate per side.
fn table_refs(sql: &str) -> Vec<TableRef> {
    let masked = mask_function_from(sql);
    let ctes = cte_names(&masked);
    let mut refs = Vec::new();

    for captures in TABLE_REF_RE.captures_iter(&masked) {
        let name_match = match captures.get(1) {
            Some(m) => m,
            None => continue,
        };
        let table = name_match.as_str().to_lowercase();
        if ctes.contains(&table) {
            continue;
        }

        let after = &masked[name_match.end()..];
        let alias = ALIAS_RE.captures(after).and_then(|c| {
            let word = c[1].to_string();
            if CLAUSE_KEYWORDS.contains(&word.to_uppercase().as_str()) {
                None
            } else {
                Some(word)
            }
        });

        refs.push(TableRef {
            position: name_match.start(),
            table,
            alias,
        });
    }

    refs
}

/// Scan every identifier and reject the statement on the first vault
/// column. Runs over the unmasked text so nothing hides inside a
/// function call.
fn find_sensitive_column(sql: &str) -> Option<String> {
    IDENT_RE
        .find_iter(sql)
        .map(|m| m.as_str())
        .find(|ident| is_sensitive_column(&ident.to_lowercase()))
        .map(|s| s.to_string())
}

/// The scoping predicate for one table reference. Loans split ownership
/// across two roles; bills are owned through their card; the shared
/// members table has no predicate at all.
fn owner_predicate(table: &str, qualifier: &str, owner_id: i64) -> Option<String> {
    match table {
        "loans_loan" => Some(format!(
            "({qualifier}.benefited_id = {owner_id} OR {qualifier}.creditor_id = {owner_id})"
        )),
        "credit_cards_creditcardbill" => Some(format!(
            "EXISTS (SELECT 1 FROM credit_cards_creditcard oc \
             WHERE oc.id = {qualifier}.credit_card_id AND oc.owner_id = {owner_id})"
        )),
        _ => catalog()
            .owner_column(table)
            .map(|col| format!("{qualifier}.{col} = {owner_id}")),
    }
}

enum Injection {
    /// Insert `{pred} AND` right after an existing WHERE keyword.
    AfterWhere(usize),
    /// Insert `WHERE {pred}` before a trailing clause keyword.
    BeforeClause(usize),
    /// Insert ` WHERE {pred}` before the closing paren of the subquery
    /// the reference lives in.
    BeforeParen(usize),
    /// No boundary found; the predicate goes at the end.
    Append,
}

/// Find where the owner predicate goes, scanning forward from a table
/// reference. Paren depth is tracked so a WHERE inside a nested
/// subquery never captures an outer reference's predicate, and string
/// literals are skipped so quoted parens do not skew the depth.
fn injection_point(tail: &str) -> Injection {
    let bytes = tail.as_bytes();
    let mut depth = 0u32;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                if depth == 0 {
                    return Injection::BeforeParen(i);
                }
                depth -= 1;
                i += 1;
            }
            b'\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if depth == 0 {
                    match tail[start..i].to_ascii_uppercase().as_str() {
                        "WHERE" => return Injection::AfterWhere(i),
                        "GROUP" | "ORDER" | "HAVING" | "LIMIT" | "OFFSET" | "UNION" | "EXCEPT"
                        | "INTERSECT" | "WINDOW" => return Injection::BeforeClause(start),
                        _ => {}
                    }
                }
            }
            _ => i += 1,
        }
    }

    Injection::Append
}

fn inject_predicate(sql: &mut String, scan_from: usize, predicate: &str) {
    match injection_point(&sql[scan_from..]) {
        Injection::AfterWhere(offset) => {
            sql.insert_str(scan_from + offset, &format!(" {predicate} AND"));
        }
        Injection::BeforeClause(offset) => {
            sql.insert_str(scan_from + offset, &format!("WHERE {predicate} "));
        }
        Injection::BeforeParen(offset) => {
            sql.insert_str(scan_from + offset, &format!(" WHERE {predicate}"));
        }
        Injection::Append => {
            sql.push_str(&format!(" WHERE {predicate}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::new(500)
    }

    #[test]
    fn test_rejects_write_keywords() {
        let v = validator();
        let err = v.validate("DROP TABLE expenses_expense", 42).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenKeyword(ref k) if k == "DROP"));

        let err = v
            .validate("INSERT INTO expenses_expense VALUES (1)", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenKeyword(_)));

        let err = v
            .validate("UPDATE expenses_expense SET value = 0", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenKeyword(ref k) if k == "UPDATE"));
    }

    #[test]
    fn test_audit_columns_do_not_trip_keyword_scan() {
        let v = validator();
        let out = v
            .validate(
                "SELECT created_at, updated_at FROM expenses_expense \
                 WHERE deleted_at IS NULL AND is_deleted = false",
                42,
            )
            .unwrap();
        assert!(out.sql.contains("deleted_at IS NULL"));
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let v = validator();
        let err = v
            .validate("SELECT value FROM expenses_expense; DROP TABLE x", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Unparseable(ref m) if m == "multiple statements"));

        // A single trailing semicolon is routine model output.
        assert!(v.validate("SELECT value FROM expenses_expense;", 42).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_tableless_statements() {
        let v = validator();
        assert!(matches!(
            v.validate("   ", 42).unwrap_err(),
            ValidationError::Unparseable(_)
        ));
        assert!(matches!(
            v.validate("SELECT 1", 42).unwrap_err(),
            ValidationError::Unparseable(_)
        ));
    }

    #[test]
    fn test_rejects_statements_not_starting_with_select() {
        let v = validator();
        let err = v
            .validate("EXPLAIN SELECT value FROM expenses_expense", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Unparseable(_)));
    }

    #[test]
    fn test_rejects_unknown_table() {
        let v = validator();
        let err = v.validate("SELECT * FROM users", 42).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTable(ref t) if t == "users"));
    }

    #[test]
    fn test_cte_names_are_not_unknown_tables() {
        let v = validator();
        let out = v
            .validate(
                "WITH monthly AS (SELECT value FROM expenses_expense) \
                 SELECT SUM(value) FROM monthly",
                7,
            )
            .unwrap();
        // The predicate lands inside the CTE body, before its closing
        // paren.
        assert!(out
            .sql
            .contains("FROM expenses_expense WHERE expenses_expense.member_id = 7)"));
    }

    #[test]
    fn test_rejects_sensitive_columns() {
        let v = validator();
        let err = v
            .validate("SELECT _password FROM security_password", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::SensitiveColumn(ref c) if c == "_password"));

        // Case-insensitive, and the underscore convention catches vault
        // fields that are not on the explicit list.
        let err = v
            .validate("SELECT p._CARD_NUMBER FROM security_password p", 42)
            .unwrap_err();
        assert!(matches!(err, ValidationError::SensitiveColumn(_)));
    }

    #[test]
    fn test_plain_columns_sharing_a_sensitive_suffix_pass() {
        let v = validator();
        // security_password the table and last_password_change the
        // column both contain "password" without being vault fields.
        let out = v
            .validate(
                "SELECT service_name, last_password_change FROM security_password",
                42,
            )
            .unwrap();
        assert!(out.sql.contains("security_password.owner_id = 42"));
    }

    #[test]
    fn test_injects_owner_predicate_without_where() {
        let v = validator();
        let out = v
            .validate("SELECT SUM(value) FROM expenses_expense", 42)
            .unwrap();
        assert_eq!(
            out.sql,
            "SELECT SUM(value) FROM expenses_expense \
             WHERE expenses_expense.member_id = 42 LIMIT 500"
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_injects_into_existing_where() {
        let v = validator();
        let out = v
            .validate(
                "SELECT value FROM expenses_expense WHERE deleted_at IS NULL",
                42,
            )
            .unwrap();
        assert_eq!(
            out.sql,
            "SELECT value FROM expenses_expense \
             WHERE expenses_expense.member_id = 42 AND deleted_at IS NULL LIMIT 500"
        );
    }

    #[test]
    fn test_injection_respects_alias() {
        let v = validator();
        let out = v
            .validate(
                "SELECT e.value FROM expenses_expense e WHERE e.payed = false",
                42,
            )
            .unwrap();
        assert!(out.sql.contains("WHERE e.member_id = 42 AND e.payed = false"));
    }

    #[test]
    fn test_injection_before_group_by() {
        let v = validator();
        let out = v
            .validate(
                "SELECT category, SUM(value) FROM expenses_expense GROUP BY category",
                42,
            )
            .unwrap();
        assert_eq!(
            out.sql,
            "SELECT category, SUM(value) FROM expenses_expense \
             WHERE expenses_expense.member_id = 42 GROUP BY category LIMIT 500"
        );
    }

    #[test]
    fn test_join_scopes_every_reference() {
        let v = validator();
        let out = v
            .validate(
                "SELECT e.value FROM expenses_expense e \
                 JOIN accounts_account a ON a.id = e.account_id \
                 WHERE e.payed = false",
                42,
            )
            .unwrap();
        assert!(out.sql.contains("e.member_id = 42"));
        assert!(out.sql.contains("a.owner_id = 42"));
    }

    #[test]
    fn test_loans_scope_covers_both_roles() {
        let v = validator();
        let out = v
            .validate("SELECT value FROM loans_loan WHERE status = 'active'", 42)
            .unwrap();
        assert!(out
            .sql
            .contains("(loans_loan.benefited_id = 42 OR loans_loan.creditor_id = 42)"));
    }

    #[test]
    fn test_bills_scope_through_owning_card() {
        let v = validator();
        let out = v
            .validate(
                "SELECT total_amount FROM credit_cards_creditcardbill WHERE status = 'open'",
                42,
            )
            .unwrap();
        assert!(out.sql.contains(
            "EXISTS (SELECT 1 FROM credit_cards_creditcard oc \
             WHERE oc.id = credit_cards_creditcardbill.credit_card_id AND oc.owner_id = 42)"
        ));
    }

    #[test]
    fn test_members_table_warns_instead_of_scoping() {
        let v = validator();
        let out = v.validate("SELECT name FROM members_member", 42).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("members_member"));
        assert!(!out.sql.contains("owner_id"));
        assert!(out.sql.ends_with("LIMIT 500"));
    }

    #[test]
    fn test_extract_month_is_not_a_table_reference() {
        let v = validator();
        let out = v
            .validate(
                "SELECT SUM(value) FROM expenses_expense \
                 WHERE EXTRACT(MONTH FROM date) = 8",
                42,
            )
            .unwrap();
        assert!(out
            .sql
            .contains("WHERE expenses_expense.member_id = 42 AND EXTRACT(MONTH FROM date) = 8"));
    }

    #[test]
    fn test_existing_limit_is_preserved() {
        let v = validator();
        let out = v
            .validate("SELECT value FROM expenses_expense LIMIT 10", 42)
            .unwrap();
        assert!(out.sql.ends_with("LIMIT 10"));
        assert!(!out.sql.contains("500"));
    }

    #[test]
    fn test_sanitized_output_is_read_only_and_scoped() {
        let v = validator();
        let statements = [
            "SELECT SUM(value) FROM expenses_expense",
            "SELECT value, date FROM revenues_revenue WHERE received = true",
            "SELECT title FROM library_book ORDER BY title",
            "SELECT value FROM loans_loan",
            "SELECT total_amount FROM credit_cards_creditcardbill",
            "WITH m AS (SELECT value FROM expenses_expense) SELECT SUM(value) FROM m",
        ];

        for statement in statements {
            let out = v.validate(statement, 42).unwrap();
            assert!(
                find_forbidden_keyword(&out.sql).is_none(),
                "write keyword in: {}",
                out.sql
            );
            let scoped = out.sql.contains("owner_id = 42")
                || out.sql.contains("member_id = 42")
                || out.sql.contains("benefited_id = 42");
            assert!(scoped, "no owner predicate in: {}", out.sql);
            assert!(LIMIT_RE.is_match(&out.sql), "no row cap in: {}", out.sql);
        }
    }
}
