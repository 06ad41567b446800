//! # Lexmail Core
//!
//! Retrieval engine for the Lexmail legal email assistant: data models,
//! filter compiler, storage abstraction, embedding trait, and the hybrid
//! vector + graph retrieval pipeline.
//!
//! This crate contains no SQL, HTTP, or filesystem I/O. Storage and
//! embedding are reached only through the [`store::Store`] and
//! [`embedding::EmbeddingProvider`] traits, so the whole pipeline can be
//! exercised against [`store::memory::InMemoryStore`] in tests.
//!
//! ## Pipeline
//!
//! ```text
//! query + filters
//!      │
//!      ▼
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  filter  │──▶│  search  │──▶│    expand    │──▶│     rank     │──▶ RetrievalResult
//! │ compile  │   │ (cosine) │   │ thread/case/ │   │ dedup+score  │
//! └──────────┘   └──────────┘   │   people     │   └──────────────┘
//!                               └──────────────┘
//! ```
//!
//! [`retrieve::Retriever`] sequences the stages.

pub mod embedding;
pub mod error;
pub mod expand;
pub mod filter;
pub mod models;
pub mod rank;
pub mod retrieve;
pub mod search;
pub mod store;

pub use error::RetrievalError;
pub use filter::{DateRange, FilterRequest, Predicate};
pub use models::{Candidate, Category, Email, Origin, RetrievalItem, RetrievalResult};
pub use retrieve::{EngineConfig, RetrievalRequest, Retriever};
