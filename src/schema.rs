//! Table catalog backing SQL generation and validation.
//!
//! A static description of every table the SQL path may touch: columns,
//! owner scoping, soft-delete behavior, and which columns are sensitive.
//! The validator consults it to reject unknown tables and sensitive
//! projections; the generator renders it into the system prompt.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Columns that must never appear in a result set. Encrypted-at-rest
/// vault fields follow the underscore-prefix convention; the explicit
/// list covers the exceptions.
pub const SENSITIVE_COLUMNS: &[&str] = &[
    "_password",
    "_card_number",
    "_security_code",
    "_account_number",
    "_digital_password",
    "_encrypted_text",
    "encrypted_file",
];

/// True if `name` may never be projected in query output.
pub fn is_sensitive_column(name: &str) -> bool {
    name.starts_with('_') || SENSITIVE_COLUMNS.contains(&name)
}

const EXPENSE_CATEGORIES: &[&str] = &[
    "food and drink",
    "bills and services",
    "electronics",
    "family and friends",
    "pets",
    "house",
    "purchases",
    "education",
    "loans",
    "entertainment",
    "taxes",
    "investments",
    "health and care",
    "supermarket",
    "transport",
    "travels",
    "others",
];

const REVENUE_CATEGORIES: &[&str] = &[
    "deposit",
    "award",
    "salary",
    "ticket",
    "income",
    "refund",
    "cashback",
    "transfer",
    "received_loan",
    "loan_devolution",
];

const PAYMENT_METHODS: &[&str] = &[
    "cash",
    "debit_card",
    "credit_card",
    "pix",
    "transfer",
    "check",
    "other",
];

const BOOK_READ_STATUSES: &[&str] = &["to_read", "reading", "read"];
const BOOK_GENRES: &[&str] = &[
    "Philosophy",
    "History",
    "Psychology",
    "Fiction",
    "Policy",
    "Technology",
    "Theology",
];
const LOAN_STATUSES: &[&str] = &["active", "paid", "overdue", "cancelled"];
const BILL_STATUSES: &[&str] = &["open", "closed", "paid", "overdue"];
const TASK_STATUSES: &[&str] = &["pending", "in_progress", "completed", "skipped", "cancelled"];
const GOAL_STATUSES: &[&str] = &["active", "completed", "failed", "cancelled"];
const MOOD_CHOICES: &[&str] = &["excellent", "good", "neutral", "bad", "terrible"];

/// One column with the metadata the SQL path cares about.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub description: &'static str,
    pub choices: &'static [&'static str],
    /// Never allowed in a projection.
    pub sensitive: bool,
    /// Meaningful under SUM/AVG.
    pub aggregable: bool,
    pub searchable: bool,
}

/// One whitelisted table.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub description: &'static str,
    /// Column carrying the owner id, when the table is directly owned.
    /// Tables reached through a parent (bills) or with split ownership
    /// (loans) have none; the validator scopes those with dedicated
    /// predicates instead.
    pub owner_column: Option<&'static str>,
    pub soft_delete: bool,
    pub columns: Vec<ColumnDef>,
    pub sample_questions: &'static [&'static str],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn col(name: &'static str, sql_type: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        sql_type,
        description: "",
        choices: &[],
        sensitive: false,
        aggregable: false,
        searchable: false,
    }
}

/// Append the audit triplet every domain table carries.
fn with_audit(mut columns: Vec<ColumnDef>) -> Vec<ColumnDef> {
    columns.push(col("created_at", "timestamptz"));
    columns.push(col("deleted_at", "timestamptz"));
    columns.push(col("is_deleted", "boolean"));
    columns
}

fn table(
    name: &'static str,
    description: &'static str,
    owner_column: Option<&'static str>,
    columns: Vec<ColumnDef>,
) -> TableDef {
    TableDef {
        name,
        description,
        owner_column,
        soft_delete: true,
        columns: with_audit(columns),
        sample_questions: &[],
    }
}

/// Catalog of whitelisted tables plus natural-language aliases.
pub struct SchemaCatalog {
    tables: Vec<TableDef>,
    by_name: HashMap<&'static str, usize>,
    aliases: HashMap<&'static str, &'static str>,
}

static CATALOG: Lazy<SchemaCatalog> = Lazy::new(SchemaCatalog::build);

/// The process-wide catalog.
pub fn catalog() -> &'static SchemaCatalog {
    &CATALOG
}

impl SchemaCatalog {
    fn build() -> Self {
        let tables = vec![
            TableDef {
                sample_questions: &[
                    "how much did I spend this month",
                    "expenses by category",
                    "biggest expenses in January",
                    "unpaid expenses",
                ],
                ..table(
                    "expenses_expense",
                    "Expenses and spending",
                    Some("member_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            description: "What the expense was",
                            ..col("description", "varchar(100)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Expense amount",
                            ..col("value", "numeric(10,2)")
                        },
                        ColumnDef {
                            description: "Expense date",
                            ..col("date", "date")
                        },
                        ColumnDef {
                            choices: EXPENSE_CATEGORIES,
                            ..col("category", "varchar(200)")
                        },
                        col("account_id", "integer"),
                        ColumnDef {
                            description: "Whether it was paid",
                            ..col("payed", "boolean")
                        },
                        ColumnDef {
                            searchable: true,
                            ..col("merchant", "varchar(200)")
                        },
                        ColumnDef {
                            choices: PAYMENT_METHODS,
                            ..col("payment_method", "varchar(50)")
                        },
                        col("member_id", "integer"),
                        ColumnDef {
                            searchable: true,
                            ..col("notes", "text")
                        },
                        col("recurring", "boolean"),
                    ],
                )
            },
            TableDef {
                sample_questions: &[
                    "how much did I earn this month",
                    "revenue by category",
                    "this month's salary",
                ],
                ..table(
                    "revenues_revenue",
                    "Revenues and income",
                    Some("member_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            ..col("description", "varchar(200)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Revenue amount",
                            ..col("value", "numeric(10,2)")
                        },
                        col("date", "date"),
                        ColumnDef {
                            choices: REVENUE_CATEGORIES,
                            ..col("category", "varchar(200)")
                        },
                        col("account_id", "integer"),
                        ColumnDef {
                            description: "Whether it was received",
                            ..col("received", "boolean")
                        },
                        ColumnDef {
                            searchable: true,
                            ..col("source", "varchar(200)")
                        },
                        ColumnDef {
                            aggregable: true,
                            ..col("net_amount", "numeric(10,2)")
                        },
                        col("member_id", "integer"),
                        col("recurring", "boolean"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["account balances", "total balance", "active accounts"],
                ..table(
                    "accounts_account",
                    "Bank accounts",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            description: "Account name",
                            ..col("account_name", "varchar(200)")
                        },
                        ColumnDef {
                            description: "Bank",
                            ..col("institution_name", "varchar(10)")
                        },
                        ColumnDef {
                            choices: &["CC", "CS", "FG", "VA"],
                            ..col("account_type", "varchar(5)")
                        },
                        col("is_active", "boolean"),
                        ColumnDef {
                            sensitive: true,
                            ..col("_account_number", "text")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Current balance",
                            ..col("current_balance", "numeric(15,2)")
                        },
                        col("opening_date", "date"),
                        col("owner_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["my credit cards", "card limits"],
                ..table(
                    "credit_cards_creditcard",
                    "Credit cards",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            description: "Card name",
                            ..col("name", "varchar(200)")
                        },
                        ColumnDef {
                            choices: &["MSC", "VSA", "ELO", "EXP", "HCD"],
                            description: "Card network",
                            ..col("flag", "varchar(5)")
                        },
                        ColumnDef {
                            sensitive: true,
                            ..col("_security_code", "text")
                        },
                        ColumnDef {
                            sensitive: true,
                            ..col("_card_number", "text")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Credit limit",
                            ..col("credit_limit", "numeric(10,2)")
                        },
                        col("associated_account_id", "integer"),
                        col("is_active", "boolean"),
                        ColumnDef {
                            description: "Statement closing day",
                            ..col("closing_day", "integer")
                        },
                        ColumnDef {
                            description: "Payment due day",
                            ..col("due_day", "integer")
                        },
                        col("owner_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["open card bills", "last bill total"],
                ..table(
                    "credit_cards_creditcardbill",
                    "Credit card bills, owned through the card",
                    None,
                    vec![
                        col("id", "integer"),
                        col("credit_card_id", "integer"),
                        col("year", "varchar(4)"),
                        col("month", "varchar(3)"),
                        col("closed", "boolean"),
                        ColumnDef {
                            aggregable: true,
                            description: "Bill total",
                            ..col("total_amount", "numeric(10,2)")
                        },
                        col("due_date", "date"),
                        ColumnDef {
                            aggregable: true,
                            ..col("paid_amount", "numeric(10,2)")
                        },
                        col("payment_date", "date"),
                        ColumnDef {
                            choices: BILL_STATUSES,
                            ..col("status", "varchar(20)")
                        },
                    ],
                )
            },
            TableDef {
                sample_questions: &["transfers this month"],
                ..table(
                    "transfers_transfer",
                    "Transfers between accounts",
                    Some("member_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            ..col("description", "varchar(200)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Transferred amount",
                            ..col("value", "numeric(10,2)")
                        },
                        col("date", "date"),
                        ColumnDef {
                            choices: &["doc", "ted", "pix"],
                            ..col("category", "varchar(10)")
                        },
                        col("origin_account_id", "integer"),
                        col("destiny_account_id", "integer"),
                        ColumnDef {
                            description: "Whether it went through",
                            ..col("transfered", "boolean")
                        },
                        ColumnDef {
                            aggregable: true,
                            ..col("fee", "numeric(10,2)")
                        },
                        col("member_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &[
                    "active loans",
                    "how much do I owe",
                    "how much is owed to me",
                ],
                ..table(
                    "loans_loan",
                    "Loans given or received; ownership splits across \
                     creditor and benefited",
                    None,
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            ..col("description", "varchar(200)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Loan principal",
                            ..col("value", "numeric(10,2)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Amount already paid",
                            ..col("payed_value", "numeric(10,2)")
                        },
                        col("date", "date"),
                        ColumnDef {
                            description: "Who received the loan",
                            ..col("benefited_id", "integer")
                        },
                        ColumnDef {
                            description: "Who lent the money",
                            ..col("creditor_id", "integer")
                        },
                        col("payed", "boolean"),
                        ColumnDef {
                            description: "Number of installments",
                            ..col("installments", "integer")
                        },
                        col("due_date", "date"),
                        ColumnDef {
                            choices: LOAN_STATUSES,
                            ..col("status", "varchar(20)")
                        },
                    ],
                )
            },
            TableDef {
                sample_questions: &[
                    "books I am reading",
                    "how many books did I read this year",
                    "books by genre",
                ],
                ..table(
                    "library_book",
                    "Personal library books",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        col("uuid", "uuid"),
                        ColumnDef {
                            searchable: true,
                            description: "Book title",
                            ..col("title", "varchar(200)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Page count",
                            ..col("pages", "integer")
                        },
                        ColumnDef {
                            choices: &["Por", "Ing", "Esp"],
                            ..col("language", "varchar(10)")
                        },
                        ColumnDef {
                            choices: BOOK_GENRES,
                            ..col("genre", "varchar(50)")
                        },
                        col("publish_date", "date"),
                        ColumnDef {
                            searchable: true,
                            ..col("synopsis", "text")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Rating from 1 to 5",
                            ..col("rating", "integer")
                        },
                        ColumnDef {
                            choices: BOOK_READ_STATUSES,
                            description: "Reading status",
                            ..col("read_status", "varchar(20)")
                        },
                        col("publisher_id", "integer"),
                        col("owner_id", "integer"),
                        col("updated_at", "timestamptz"),
                    ],
                )
            },
            table(
                "library_author",
                "Book authors",
                Some("owner_id"),
                vec![
                    col("id", "integer"),
                    ColumnDef {
                        searchable: true,
                        ..col("name", "varchar(200)")
                    },
                    col("birth_year", "integer"),
                    col("death_year", "integer"),
                    col("nationality", "varchar(10)"),
                    ColumnDef {
                        searchable: true,
                        ..col("biography", "text")
                    },
                    col("owner_id", "integer"),
                ],
            ),
            table(
                "library_publisher",
                "Book publishers",
                Some("owner_id"),
                vec![
                    col("id", "integer"),
                    ColumnDef {
                        searchable: true,
                        ..col("name", "varchar(200)")
                    },
                    col("country", "varchar(10)"),
                    col("founded_year", "integer"),
                    col("owner_id", "integer"),
                ],
            ),
            TableDef {
                sample_questions: &[
                    "how many pages did I read today",
                    "reading history this month",
                ],
                ..table(
                    "library_reading",
                    "Logged reading sessions",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        col("book_id", "integer"),
                        ColumnDef {
                            description: "Session date",
                            ..col("reading_date", "date")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Minutes spent",
                            ..col("reading_time", "integer")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Pages read in the session",
                            ..col("pages_read", "integer")
                        },
                        ColumnDef {
                            searchable: true,
                            ..col("notes", "text")
                        },
                        col("owner_id", "integer"),
                    ],
                )
            },
            table(
                "library_summary",
                "Book summaries",
                Some("owner_id"),
                vec![
                    col("id", "integer"),
                    ColumnDef {
                        searchable: true,
                        ..col("title", "varchar(200)")
                    },
                    col("book_id", "integer"),
                    ColumnDef {
                        searchable: true,
                        description: "Summary body in markdown",
                        ..col("text", "text")
                    },
                    col("owner_id", "integer"),
                ],
            ),
            TableDef {
                sample_questions: &["my saved passwords"],
                ..table(
                    "security_password",
                    "Stored passwords; metadata only, never the secret",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        ColumnDef {
                            searchable: true,
                            description: "Service name",
                            ..col("title", "varchar(200)")
                        },
                        ColumnDef {
                            description: "Site URL",
                            ..col("site", "varchar(200)")
                        },
                        col("username", "varchar(200)"),
                        ColumnDef {
                            sensitive: true,
                            ..col("_password", "text")
                        },
                        ColumnDef {
                            choices: &[
                                "social",
                                "email",
                                "banking",
                                "work",
                                "entertainment",
                                "shopping",
                                "streaming",
                                "gaming",
                                "other",
                            ],
                            ..col("category", "varchar(50)")
                        },
                        col("last_password_change", "timestamptz"),
                        col("owner_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["my routine tasks", "active habits"],
                ..table(
                    "personal_planning_routinetask",
                    "Routine tasks and habits",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        ColumnDef {
                            searchable: true,
                            description: "Task name",
                            ..col("name", "varchar(200)")
                        },
                        col("description", "text"),
                        col("category", "varchar(50)"),
                        ColumnDef {
                            choices: &["daily", "weekdays", "weekly", "monthly", "custom"],
                            ..col("periodicity", "varchar(20)")
                        },
                        col("is_active", "boolean"),
                        ColumnDef {
                            description: "Target quantity",
                            ..col("target_quantity", "integer")
                        },
                        ColumnDef {
                            description: "Unit (glasses, minutes, pages, ...)",
                            ..col("unit", "varchar(50)")
                        },
                        col("owner_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["my active goals", "goal progress"],
                ..table(
                    "personal_planning_goal",
                    "Personal goals",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        ColumnDef {
                            searchable: true,
                            description: "Goal title",
                            ..col("title", "varchar(200)")
                        },
                        col("description", "text"),
                        ColumnDef {
                            choices: &["consecutive_days", "total_days", "avoid_habit", "custom"],
                            ..col("goal_type", "varchar(30)")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Target value",
                            ..col("target_value", "integer")
                        },
                        ColumnDef {
                            aggregable: true,
                            description: "Current value",
                            ..col("current_value", "integer")
                        },
                        col("start_date", "date"),
                        col("end_date", "date"),
                        ColumnDef {
                            choices: GOAL_STATUSES,
                            ..col("status", "varchar(20)")
                        },
                        col("owner_id", "integer"),
                    ],
                )
            },
            TableDef {
                sample_questions: &["today's tasks", "pending tasks"],
                ..table(
                    "personal_planning_taskinstance",
                    "Scheduled task instances",
                    Some("owner_id"),
                    vec![
                        col("id", "integer"),
                        col("template_id", "integer"),
                        ColumnDef {
                            searchable: true,
                            ..col("task_name", "varchar(200)")
                        },
                        col("category", "varchar(50)"),
                        ColumnDef {
                            description: "Scheduled date",
                            ..col("scheduled_date", "date")
                        },
                        col("scheduled_time", "time"),
                        ColumnDef {
                            choices: TASK_STATUSES,
                            ..col("status", "varchar(20)")
                        },
                        col("target_quantity", "integer"),
                        ColumnDef {
                            aggregable: true,
                            ..col("quantity_completed", "integer")
                        },
                        col("completed_at", "timestamptz"),
                        col("owner_id", "integer"),
                    ],
                )
            },
            table(
                "personal_planning_dailyreflection",
                "Daily reflections and mood",
                Some("owner_id"),
                vec![
                    col("id", "integer"),
                    ColumnDef {
                        description: "Reflection date",
                        ..col("date", "date")
                    },
                    ColumnDef {
                        searchable: true,
                        description: "Reflection text",
                        ..col("reflection", "text")
                    },
                    ColumnDef {
                        choices: MOOD_CHOICES,
                        description: "Mood of the day",
                        ..col("mood", "varchar(20)")
                    },
                    col("owner_id", "integer"),
                ],
            ),
            table(
                "members_member",
                "Household members",
                None,
                vec![
                    col("id", "integer"),
                    col("uuid", "uuid"),
                    ColumnDef {
                        searchable: true,
                        ..col("name", "varchar(200)")
                    },
                    col("email", "varchar(200)"),
                    col("active", "boolean"),
                    col("birth_date", "date"),
                ],
            ),
        ];

        let by_name = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name, i))
            .collect();

        let mut aliases: HashMap<&'static str, &'static str> = HashMap::new();
        for (alias, target) in [
            ("expenses", "expenses_expense"),
            ("expense", "expenses_expense"),
            ("spending", "expenses_expense"),
            ("revenues", "revenues_revenue"),
            ("revenue", "revenues_revenue"),
            ("income", "revenues_revenue"),
            ("accounts", "accounts_account"),
            ("account", "accounts_account"),
            ("cards", "credit_cards_creditcard"),
            ("card", "credit_cards_creditcard"),
            ("bills", "credit_cards_creditcardbill"),
            ("bill", "credit_cards_creditcardbill"),
            ("transfers", "transfers_transfer"),
            ("transfer", "transfers_transfer"),
            ("loans", "loans_loan"),
            ("loan", "loans_loan"),
            ("books", "library_book"),
            ("book", "library_book"),
            ("authors", "library_author"),
            ("author", "library_author"),
            ("publishers", "library_publisher"),
            ("readings", "library_reading"),
            ("reading", "library_reading"),
            ("summaries", "library_summary"),
            ("summary", "library_summary"),
            ("passwords", "security_password"),
            ("password", "security_password"),
            ("tasks", "personal_planning_routinetask"),
            ("task", "personal_planning_routinetask"),
            ("habits", "personal_planning_routinetask"),
            ("routines", "personal_planning_routinetask"),
            ("goals", "personal_planning_goal"),
            ("goal", "personal_planning_goal"),
            ("reflections", "personal_planning_dailyreflection"),
            ("reflection", "personal_planning_dailyreflection"),
            ("members", "members_member"),
            ("member", "members_member"),
        ] {
            aliases.insert(alias, target);
        }

        Self {
            tables,
            by_name,
            aliases,
        }
    }

    /// Resolve a table name or natural-language alias to the canonical
    /// table name.
    pub fn resolve(&self, name: &str) -> Option<&'static str> {
        let lower = name.to_lowercase();
        if let Some(&idx) = self.by_name.get(lower.as_str()) {
            return Some(self.tables[idx].name);
        }
        self.aliases.get(lower.as_str()).copied()
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        let canonical = self.resolve(name)?;
        self.by_name.get(canonical).map(|&idx| &self.tables[idx])
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.by_name.contains_key(name.to_lowercase().as_str())
    }

    pub fn owner_column(&self, name: &str) -> Option<&'static str> {
        self.table(name).and_then(|t| t.owner_column)
    }

    pub fn uses_soft_delete(&self, name: &str) -> bool {
        self.table(name).map(|t| t.soft_delete).unwrap_or(false)
    }

    pub fn all_tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.iter().map(|t| t.name)
    }

    pub fn aggregable_columns(&self, name: &str) -> Vec<&'static str> {
        self.table(name)
            .map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.aggregable)
                    .map(|c| c.name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render the catalog as the schema block of the SQL system prompt.
    /// Deterministic output: tables in declaration order, sensitive
    /// columns omitted entirely.
    pub fn prompt_block(&self) -> String {
        let mut lines: Vec<String> = vec!["# DATABASE SCHEMA".to_string()];

        for t in &self.tables {
            lines.push(String::new());
            lines.push(format!("## {}", t.name));
            lines.push(format!("Description: {}", t.description));
            if let Some(owner) = t.owner_column {
                lines.push(format!("Owner column: {owner}"));
            }
            if t.soft_delete {
                lines.push("Soft delete: filter active rows with deleted_at IS NULL".to_string());
            }
            lines.push(String::new());
            lines.push("Columns:".to_string());
            for c in &t.columns {
                if c.sensitive {
                    continue;
                }
                let mut line = format!("  - {} ({})", c.name, c.sql_type);
                if !c.description.is_empty() {
                    line.push_str(": ");
                    line.push_str(c.description);
                }
                if !c.choices.is_empty() {
                    if c.choices.len() <= 10 {
                        line.push_str(&format!(" [choices: {}]", c.choices.join(", ")));
                    } else {
                        line.push_str(&format!(" [choices: {}, ...]", c.choices[..5].join(", ")));
                    }
                }
                lines.push(line);
            }
            if !t.sample_questions.is_empty() {
                lines.push(String::new());
                lines.push("Sample questions:".to_string());
                for q in t.sample_questions {
                    lines.push(format!("  - {q}"));
                }
            }
        }

        lines.join("\n")
    }
}
