//! Local cache store: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed entities mirroring the local SQLite schema.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `stocksync::db`; the repository
//! API and the entities callers work with are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{CachedItem, OfflineTransaction};
