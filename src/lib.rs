//! # deckindex
//!
//! Full-text search over a library of slide decks, word documents and PDFs,
//! one result per page.
//!
//! A synchronized folder is mirrored into a local library; every new or
//! changed upload is converted to PDF, rendered to page images, split into
//! per-page text, tokenized, and written to a SQLite term index. Queries
//! are ranked page by page (raw match, TF-IDF, or BM25) and served over a
//! small HTTP API together with the page images.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ Remote folder│──▶│ Pipeline (schedulers)    │──▶│  SQLite  │
//! │  → library   │   │ convert→render→extract→  │   │ pages +  │
//! └──────────────┘   │ tokenize→index           │   │  terms   │
//!                    └──────────────────────────┘   └────┬─────┘
//!                                                        │
//!                              ┌─────────────────────────┤
//!                              ▼                         ▼
//!                         ┌──────────┐             ┌──────────┐
//!                         │   CLI    │             │   HTTP   │
//!                         │  (dix)   │             │ /pages   │
//!                         └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dix init                         # create database and library folders
//! dix sync                         # pull + index once
//! dix search "quarterly revenue"   # rank pages
//! dix serve                        # HTTP API + background sync
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | Persistent index store |
//! | [`scheduler`] | Bounded job queue with soft timeouts |
//! | [`tools`] | External command runner and its errors |
//! | [`convert`] / [`extract`] / [`tokenize`] | External collaborators |
//! | [`library`] | Local library layout and snapshots |
//! | [`pipeline`] | Per-file ingestion |
//! | [`sync`] | Remote mirror and sync cycles |
//! | [`search`] | Query path |
//! | [`server`] | HTTP API |
//! | [`stats`] | Index summary for `dix stats` |

pub mod config;
pub mod convert;
pub mod db;
pub mod extract;
pub mod library;
pub mod migrate;
pub mod pipeline;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod sync;
pub mod tokenize;
pub mod tools;
