//! Day-bounded pagination: drain every page for one day, track completion,
//! and walk a date range skipping days already retrieved.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use tracing::{info, instrument};

use crate::daterange::daterange_inclusive;
use crate::db::{self, Pool};
use crate::sanitize::strip_noise_fields;
use crate::transport::ApiTransport;

/// Which record fields to request from the API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldFilter {
    /// No `fields` parameter; the API returns every field.
    #[default]
    None,
    Single(String),
    List(Vec<String>),
}

impl FieldFilter {
    /// The query-string fragment appended to the first-page URL.
    pub fn query_fragment(&self) -> String {
        match self {
            FieldFilter::None => String::new(),
            FieldFilter::Single(name) => format!("&fields={name}"),
            FieldFilter::List(names) => format!("&fields={}", names.join(",")),
        }
    }

    /// Collapse a CLI-style list of field names into the matching variant.
    pub fn from_names(names: &[String]) -> Self {
        match names {
            [] => FieldFilter::None,
            [one] => FieldFilter::Single(one.clone()),
            many => FieldFilter::List(many.to_vec()),
        }
    }
}

/// Everything about one harvest target that stays fixed across days.
#[derive(Debug, Clone)]
pub struct HarvestJob {
    pub base_url: String,
    pub endpoint: String,
    /// Destination table; conventionally the endpoint name.
    pub table: String,
    pub page_limit: u32,
    pub fields: FieldFilter,
    pub noise_fields: Vec<String>,
}

/// Retrieve every record inserted on `day` for the job's endpoint, across as
/// many pages as the API returns, then attempt exactly one completion-record
/// write (the tracker itself refuses today and future days).
///
/// Transport failures propagate as-is: the day stays unmarked and the next
/// run re-drains it from page one. A retried day can re-append pages already
/// stored by an earlier partial run; callers needing deduplication must do
/// it downstream.
#[instrument(skip_all)]
pub async fn drain_day(
    transport: &dyn ApiTransport,
    job: &HarvestJob,
    day: &str,
    pool: &Pool,
) -> Result<()> {
    let first_url = format!(
        "{}{}?limit={}&dateInserted={}{}",
        job.base_url,
        job.endpoint,
        job.page_limit,
        day,
        job.fields.query_fragment()
    );
    let mut page = transport.get(&first_url).await?;

    if page.result_count == 0 {
        info!(endpoint = %job.endpoint, day, "no records for day");
        db::record_completed_day(pool, &job.endpoint, day).await?;
        return Ok(());
    }

    loop {
        let next_page = page.next_page.take();
        let sanitized = strip_noise_fields(page.records, &job.noise_fields);
        db::append_records(pool, &job.table, &sanitized).await?;
        match next_page {
            // Continuation URLs come from the API verbatim; nothing is
            // appended or rebuilt here.
            Some(url) => page = transport.get(&url).await?,
            None => break,
        }
    }

    db::record_completed_day(pool, &job.endpoint, day).await?;
    Ok(())
}

/// Drive [`drain_day`] across `[start_date, end_date]` inclusive, skipping
/// days already in the completion set. `end_date = None` means today,
/// resolved once here. A re-run over a fully completed range makes zero
/// transport calls.
#[instrument(skip_all)]
pub async fn harvest_endpoint(
    transport: &dyn ApiTransport,
    job: &HarvestJob,
    pool: &Pool,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<()> {
    let end_date = end_date.unwrap_or_else(|| Local::now().date_naive());
    let completed = db::completed_days(pool, &job.endpoint).await?;

    for day in daterange_inclusive(start_date, end_date) {
        let day = day.format("%Y-%m-%d").to_string();
        if completed.contains(&day) {
            info!(endpoint = %job.endpoint, day, "day already retrieved, skipping");
            continue;
        }
        info!(endpoint = %job.endpoint, day, "retrieving day");
        drain_day(transport, job, &day, pool).await?;
    }
    Ok(())
}
