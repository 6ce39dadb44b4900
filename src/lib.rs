//! # NCM Harness
//!
//! An invoice extraction and customs-classification pipeline.
//!
//! NCM Harness turns scanned or digital commercial invoices (PDF or
//! image) into structured line items via a vision model, then resolves
//! each item to a customs nomenclature code (NCM) by fusing four search
//! strategies (a learned per-provider catalog, stemmed full-text search,
//! trigram fuzzy search, and semantic vector search) into one
//! confidence-labelled decision per item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Splitter    │──▶│  Extractor   │──▶│  Classifier    │
//! │ PDF pages    │   │ vision+repair│   │ expand+embed  │
//! └──────────────┘   └──────┬───────┘   └──────┬────────┘
//!                           │                  │
//!                     ┌─────▼─────┐     ┌──────▼────────┐
//!                     │ Batch     │     │ Layered search │
//!                     │ executor  │     │ + fusion       │
//!                     └───────────┘     └──────┬────────┘
//!                                       ┌──────▼────────┐
//!                                       │ SQLite        │
//!                                       │ FTS5 + vectors │
//!                                       └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`split`] | PDF page splitting and encryption probing |
//! | [`repair`] | Repair of malformed model JSON |
//! | [`batch`] | Rate-limited batch execution with backoff |
//! | [`vision`] | Vision/LLM provider abstraction |
//! | [`embedding`] | Embedding provider abstraction and vector utils |
//! | [`extractor`] | Document → header + line items |
//! | [`expand`] | Query expansion into nomenclature phrasing |
//! | [`trigram`] | Character-trigram similarity |
//! | [`store`] | Nomenclature/catalog storage abstraction |
//! | [`search`] | Layered search and result fusion |
//! | [`classify`] | Per-invoice classification orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod expand;
pub mod extractor;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod repair;
pub mod search;
pub mod split;
pub mod store;
pub mod trigram;
pub mod vision;
