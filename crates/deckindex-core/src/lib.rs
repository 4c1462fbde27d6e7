//! # deckindex core
//!
//! Runtime-free logic shared by the `deckindex` service: the page model,
//! deterministic identifiers, file-tree diffing, the [`store::IndexStore`]
//! abstraction, the query-time [`rank::Ranker`], and term correlation.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Everything that
//! touches the outside world lives in the application crate.

pub mod correlation;
pub mod diff;
pub mod ids;
pub mod models;
pub mod rank;
pub mod store;
