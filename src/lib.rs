//! Incremental harvester for a forum REST API.
//!
//! Walks a date range one calendar day at a time, drains every page the API
//! returns for that day, strips noisy fields, and appends the records to a
//! SQLite table. Completed days are marked in a `retrieved_dates` table so a
//! re-run skips them entirely.

pub mod config;
pub mod daterange;
pub mod db;
pub mod harvest;
pub mod sanitize;
pub mod transport;
