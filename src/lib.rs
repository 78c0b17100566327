//! # KB Engine
//!
//! The retrieval core of a knowledge-base service: keeps an indexed chunk
//! store in sync with a remote file store and answers queries over it with
//! hybrid dense + lexical search.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Gateway    │──▶│  SyncEngine   │──▶│  SQLite    │
//! │ list + get  │   │ parse/chunk/ │   │ chunks +  │
//! └─────────────┘   │    embed     │   │ FTS5      │
//!                   └──────────────┘   └─────┬─────┘
//!                                            │
//!                                            ▼
//!                                  ┌──────────────────┐
//!                   query ────────▶│ HybridRetriever  │──▶ results
//!                                  │ dense + lexical  │
//!                                  │ RRF → rerank     │
//!                                  └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Boundary-aware text and markdown chunking |
//! | [`db`] | Database connection |
//! | [`store`] | Chunk store: schema, atomic replace, dense + lexical search |
//! | [`embed`] | Embedding client abstraction and vector utilities |
//! | [`rerank`] | Second-pass candidate reranking |
//! | [`remote`] | Remote file store access via the gateway |
//! | [`parse`] | Bytes-to-text conversion for downloaded documents |
//! | [`sync`] | Change-detection sync pass |
//! | [`retriever`] | Hybrid retrieval pipeline |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embed;
pub mod error;
mod http;
pub mod models;
pub mod parse;
pub mod remote;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod sync;

pub use error::{KbError, Result};
