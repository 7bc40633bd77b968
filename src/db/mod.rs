//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions for the dedup markers and scheduled items.
//!
//! Callers import from `tg_autoposter::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::StatusCounts;
