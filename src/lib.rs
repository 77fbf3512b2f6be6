//! # Knowledge Harness
//!
//! Schema-guided document decomposition, an embedding store, and
//! multi-strategy retrieval for expert knowledge bases.
//!
//! Documents (slide decks, markdown, text, PDF) are read to plain text,
//! decomposed by a language model into a few typed, titled chunks according
//! to their document type, tagged with categorised keywords, embedded, and
//! stored in SQLite. Retrieval offers keyword, vector, and fused hybrid
//! search over those chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌───────────┐
//! │  extract │──▶│ decompose  │──▶│ keywords  │──▶│   store   │
//! │ pptx/pdf │   │ LLM schema │   │ LLM terms │   │  SQLite   │
//! └──────────┘   └────────────┘   └───────────┘   └─────┬─────┘
//!                                                       │
//!                      ┌──────────┐                     ▼
//!                      │  tokens  │◀──────────── ┌───────────┐
//!                      │  ledger  │              │  search   │
//!                      └──────────┘              │ kw/vec/hyb│
//!                                                └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kh init                                   # create databases
//! kh ingest ./manuals --doc-type troubleshooting
//! kh search "etch rate drift" --mode hybrid
//! kh keywords backfill
//! kh tokens --days 7
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Library error types |
//! | [`extract`] | File readers (txt, md, pptx, docx, pdf) |
//! | [`llm`] | Completion/embedding service traits and HTTP client |
//! | [`decompose`] | Schema-guided chunk decomposition |
//! | [`keywords`] | Keyword categorisation and backfill |
//! | [`store`] | Embedding store and vector codec |
//! | [`search`] | Keyword, vector, and hybrid retrieval |
//! | [`tokens`] | Token usage ledger |
//! | [`ingest`] | Ingestion orchestration |
//! | [`progress`] | Batch progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod decompose;
pub mod error;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod keywords;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod stats;
pub mod store;
pub mod tokens;
