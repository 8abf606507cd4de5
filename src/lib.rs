//! # pr-context
//!
//! Codebase indexing and change detection for pull request verification.
//!
//! The crate does two independent jobs:
//!
//! 1. **Indexing**: walk a repository, split source files into overlapping,
//!    line-aligned chunks tagged with function/class/import metadata, embed
//!    them, and upsert them into a vector index keyed by a deterministic
//!    chunk identity (re-indexing never duplicates).
//! 2. **Change detection**: fingerprint tickets and pull requests with a
//!    canonical content hash and cache the last analysis per fingerprint,
//!    so expensive reanalysis only happens when content changed or the
//!    cached result has gone stale.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ discover │──▶│  chunk   │──▶│ embedding │──▶│ IndexStore │
//! │ walkdir  │   │ + tagger │   │  Embedder │   │  (SQLite)  │
//! └──────────┘   └──────────┘   └───────────┘   └────────────┘
//!
//! ┌──────────┐   ┌────────────────┐   ┌────────────┐   ┌──────────────┐
//! │   hash   │──▶│ ChangeDetector │──▶│ StateStore │──▶│ StateBackend │
//! │ canonical│   │ fresh / stale  │   │ versioned  │   │ TTL'd KV     │
//! └──────────┘   └────────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Chunks, index documents, analysis records |
//! | [`hash`] | Canonical encoding and fingerprints |
//! | [`chunk`] | Line-window chunker and metadata tagger |
//! | [`discover`] | Candidate file discovery |
//! | [`repo`] | Source root validation |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index_store`] | Vector index boundary (SQLite, in-memory) |
//! | [`pipeline`] | Batched indexing run |
//! | [`search`] | Query front-end over the index |
//! | [`state`] | Fingerprint-keyed analysis cache |
//! | [`change`] | Fresh/stale decisions for tickets and pull requests |
//! | [`stats`] | Human-readable index and cache statistics |
//! | [`error`] | Typed failures |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod change;
pub mod chunk;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod index_store;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod repo;
pub mod search;
pub mod state;
pub mod stats;
