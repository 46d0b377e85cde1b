//! # Query Harness
//!
//! A privacy-first natural-language query engine over personal data.
//!
//! Query Harness answers questions about a user's own records (finances,
//! library, planning, credentials metadata) by picking, per request, between
//! a constrained SQL path for precise/aggregate questions and a semantic
//! retrieval (RAG) path for open-ended ones, while guaranteeing that content
//! above a sensitivity threshold is never sent to a remote inference provider.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌───────────────┐
//!        question ─────▶│    Intent     │
//!                       │  Classifier   │
//!                       └──────┬────────┘
//!                   sql/hybrid │ rag
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!      ┌──────────────┐  on failure    ┌──────────────┐
//!      │  SQL Engine  │───────────────▶│  Retrieval   │
//!      │ Gen→Val→Exec │                │  + Cache     │
//!      │  →Format     │                └──────┬───────┘
//!      └──────┬───────┘                       ▼
//!             │                        ┌──────────────┐
//!             │                        │  Sensitivity │
//!             │                        │   Router     │
//!             │                        └──────┬───────┘
//!             │                     local ────┴──── remote
//!             ▼                               ▼
//!           ChatResponse ◀────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use query_harness::chat::{ChatService, QueryRequest};
//! use query_harness::config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cfg = config::load_config("./config/qh.toml".as_ref())?;
//! let service = ChatService::from_config(&cfg).await?;
//!
//! let response = service
//!     .query(QueryRequest::new("how much did I spend this month?", 42))
//!     .await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`embedding`] | HTTP embedding client + vector utilities |
//! | [`schema`] | Domain table catalog |
//! | [`prompts`] | Prompt builders and keyword detectors |
//! | [`intent`] | Execution-mode classification (sql / rag / hybrid) |
//! | [`sensitivity`] | Sensitivity + complexity classification |
//! | [`retrieval`] | Similarity search over the content index |
//! | [`generator`] | Natural language → SQL generation |
//! | [`validator`] | SQL safety validation and rewriting |
//! | [`executor`] | Timeout-bounded SQL execution |
//! | [`formatter`] | Result formatting and visualization |
//! | [`providers`] | Local/remote inference provider adapters |
//! | [`router`] | Sensitivity-driven provider routing |
//! | [`cache`] | Exact + semantic response cache |
//! | [`context`] | Retrieval-context building |
//! | [`indexer`] | Content extraction and embedding indexing |
//! | [`chat`] | Orchestrator: the `query` entry point |
//! | [`store`] | Relational store seam (Postgres) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Content-index schema migrations |

pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod generator;
pub mod indexer;
pub mod intent;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod router;
pub mod schema;
pub mod sensitivity;
pub mod store;
pub mod validator;
