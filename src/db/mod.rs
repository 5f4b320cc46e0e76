//! Database module: SQLite pool setup and the harvest repositories.
//!
//! `repo` holds the SQL-only functions: dynamic record-table appends and the
//! per-(endpoint, day) completion tracker. External modules should import
//! from `forum_harvest::db` — we re-export the repository API.

pub mod repo;

pub use repo::*;
