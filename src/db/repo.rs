use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    // Enable WAL for crash-safe sequential writes.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Append sanitized records to `table`, creating the table and any missing
/// columns on first sight. Records may be heterogeneous between pages; no
/// schema is enforced here beyond TEXT columns. Existing rows are never
/// touched.
#[instrument(skip_all)]
pub async fn append_records(
    pool: &Pool,
    table: &str,
    rows: &[Map<String, Value>],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    // Union of field names across the page, first-seen order.
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    if columns.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    ensure_columns(&mut tx, table, &columns).await?;
    for row in rows {
        if row.is_empty() {
            continue;
        }
        let col_list = row
            .keys()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            col_list,
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = query.bind(value_to_text(value));
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Create `table` if missing, or ALTER in any columns it has not seen yet.
async fn ensure_columns(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    columns: &[String],
) -> Result<()> {
    let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut **tx)
        .await?;
    if existing.is_empty() {
        let cols = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            cols
        ))
        .execute(&mut **tx)
        .await?;
        return Ok(());
    }
    for column in columns {
        if !existing.iter().any(|e| e == column) {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT",
                quote_ident(table),
                quote_ident(column)
            ))
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

/// Mark `(endpoint, day)` fully retrieved. Today and future days are never
/// marked: the API may still receive records for them, so writing a marker
/// would wrongly suppress a later retrieval. That case logs and returns
/// without side effects.
#[instrument(skip_all)]
pub async fn record_completed_day(pool: &Pool, endpoint: &str, day: &str) -> Result<()> {
    let parsed = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("invalid completion date {day:?}"))?;
    if parsed >= Local::now().date_naive() {
        warn!(
            endpoint,
            day, "not marking present or future date complete; data may be incomplete"
        );
        return Ok(());
    }
    sqlx::query("INSERT INTO retrieved_dates (endpoint, date) VALUES (?, ?)")
        .bind(endpoint)
        .bind(day)
        .execute(pool)
        .await?;
    info!(endpoint, day, "marked day complete");
    Ok(())
}

/// Day strings previously recorded complete for `endpoint`.
#[instrument(skip_all)]
pub async fn completed_days(pool: &Pool, endpoint: &str) -> Result<HashSet<String>> {
    let days: Vec<String> =
        sqlx::query_scalar("SELECT date FROM retrieved_dates WHERE endpoint = ?")
            .bind(endpoint)
            .fetch_all(pool)
            .await?;
    Ok(days.into_iter().collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite rendering of a JSON value: strings raw, NULL for null, everything
/// else (numbers, bools, nested structures) as its JSON text.
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
