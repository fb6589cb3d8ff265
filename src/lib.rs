//! # docdex
//!
//! Incremental document indexing with hybrid (vector + keyword) retrieval.
//!
//! docdex keeps named collections of text documents synchronized with
//! external sources (local manifests, remote manifests, git repositories,
//! zip bundles), chunks and embeds what changed, and answers free-text
//! queries by fusing a vector-similarity ranking with a keyword ranking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Sources    │──▶│     Sync     │──▶│  SQLite    │
//! │ fs/http/git/ │   │ diff + chunk │   │ FTS5 + vec │
//! │    bundle    │   │   + embed    │   └─────┬─────┘
//! └──────────────┘   └──────────────┘         │
//!                                             ▼
//!                                       ┌───────────┐
//!                                       │  Hybrid    │
//!                                       │  search    │
//!                                       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! use docdex::embedding::ProviderCell;
//! use docdex::search::SearchRequest;
//! use docdex::store::DocStore;
//!
//! let config = docdex::config::load_config("docdex.toml".as_ref())?;
//! let embedder = ProviderCell::new(config.embedding.clone());
//! let store = DocStore::open(&config.db.path, embedder, config.chunking.clone()).await?;
//!
//! docdex::sync::sync(&store, "project-docs", "docs/docdex.json", ".".as_ref(), false).await?;
//!
//! let results = docdex::search::search(&store, &SearchRequest::new("authentication"), None).await?;
//! # Ok(()) }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`manifest`] | Manifest parsing and entry resolution |
//! | [`sync`] | Source locators and incremental sync |
//! | [`fetch`] | file/http content fetch |
//! | [`git`] | Ephemeral repository checkouts |
//! | [`bundle`] | Zip bundle extraction |
//! | [`chunk`] | Text chunking with heading context |
//! | [`outline`] | Heading outlines and section extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Document and chunk persistence |
//! | [`search`] | Hybrid retrieval with RRF fusion |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bundle;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod git;
pub mod manifest;
pub mod migrate;
pub mod models;
pub mod outline;
pub mod search;
pub mod store;
pub mod sync;

pub use models::{SearchResultItem, SyncResult};
pub use search::SearchRequest;
pub use store::DocStore;
pub use sync::SourceSpec;
