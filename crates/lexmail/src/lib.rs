//! # Lexmail
//!
//! **Context retrieval over a legal practice's email.**
//!
//! Lexmail imports emails into a SQLite graph store (emails, people,
//! cases, and the thread / reply / involvement / case edges between them)
//! and answers natural-language questions with a hybrid retrieval: vector
//! search for the best direct matches, then a bounded graph expansion that
//! pulls in their thread, their dossier, and their correspondents.
//!
//! The retrieval pipeline itself lives in [`lexmail_core`]; this crate
//! supplies the SQLite [`sqlite_store::SqliteStore`], the HTTP embedding
//! providers, the JSONL importer, and the `lexmail` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │  emails     │──▶│   import    │──▶│      SQLite      │
//! │  (.jsonl)   │   │ embed+link  │   │  nodes + edges   │
//! └─────────────┘   └─────────────┘   └────────┬─────────┘
//!                                              │ Store
//!                                              ▼
//!                                     ┌──────────────────┐
//!                                     │  lexmail-core    │
//!                                     │  Retriever       │
//!                                     └────────┬─────────┘
//!                                              ▼
//!                                       CLI (lexmail)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | [`lexmail_core::store::Store`] over SQLite |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`import`] | JSONL import and relation building |
//! | [`search`] | `search` and `browse` commands |
//! | [`stats`] | Database statistics |

pub mod config;
pub mod db;
pub mod embedding;
pub mod import;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
