//! HTTP transport for the forum API: rate ceiling, retries, page parsing.
//!
//! The harvester itself never talks to `reqwest` directly; it goes through
//! the [`ApiTransport`] trait so tests can substitute a scripted transport.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::Config;

/// Header carrying the number of results on the current page.
pub const RESULT_COUNT_HEADER: &str = "x-app-page-result-count";
/// Header carrying the opaque URL of the next page, absent on the last page.
pub const NEXT_PAGE_HEADER: &str = "x-app-page-next-url";

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// One page of API results plus its continuation metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiPage {
    pub result_count: u64,
    pub next_page: Option<String>,
    pub records: Vec<Map<String, Value>>,
}

/// Capability the harvester needs from HTTP: issue a GET, get back a parsed
/// page. Rate limiting and retry policy live behind this seam.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<ApiPage>;
}

/// Real transport backed by reqwest. Enforces a per-minute call ceiling and
/// retries a configured set of statuses (and connection failures) with
/// exponential backoff before surfacing an error. Requests carry no
/// client-side timeout.
pub struct ForumClient {
    http: Client,
    per_minute_limit: u32,
    max_retries: u32,
    retry_statuses: Vec<u16>,
    backoff_seconds: f64,
    recent_calls: Mutex<VecDeque<Instant>>,
}

impl fmt::Debug for ForumClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForumClient")
            .field("per_minute_limit", &self.per_minute_limit)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ForumClient {
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.api.per_minute_limit,
            cfg.api.max_retries,
            cfg.api.retry_statuses.clone(),
            cfg.api.backoff_seconds,
        )
    }

    pub fn new(
        per_minute_limit: u32,
        max_retries: u32,
        retry_statuses: Vec<u16>,
        backoff_seconds: f64,
    ) -> Self {
        let http = Client::builder()
            .user_agent("forum-harvest/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            per_minute_limit: per_minute_limit.max(1),
            max_retries,
            retry_statuses,
            backoff_seconds,
            recent_calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until issuing one more call stays under the per-minute ceiling,
    /// then record the call.
    async fn throttle(&self) {
        loop {
            let wait_until = {
                let mut calls = self.recent_calls.lock().await;
                while calls
                    .front()
                    .is_some_and(|t| t.elapsed() >= RATE_WINDOW)
                {
                    calls.pop_front();
                }
                if calls.len() < self.per_minute_limit as usize {
                    calls.push_back(Instant::now());
                    None
                } else {
                    calls.front().map(|t| *t + RATE_WINDOW)
                }
            };
            match wait_until {
                None => return,
                Some(deadline) => {
                    debug!("per-minute call ceiling reached, waiting");
                    sleep_until(deadline).await;
                }
            }
        }
    }
}

#[async_trait]
impl ApiTransport for ForumClient {
    async fn get(&self, url: &str) -> Result<ApiPage> {
        let mut attempt: u32 = 0;
        loop {
            self.throttle().await;
            match self.http.get(url).send().await {
                Ok(res) => {
                    let status = res.status();
                    if status.is_success() {
                        return read_page(res).await;
                    }
                    if self.retry_statuses.contains(&status.as_u16())
                        && attempt < self.max_retries
                    {
                        warn!(%status, url, attempt, "retryable status, backing off");
                        sleep(backoff_delay(self.backoff_seconds, attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let body = res.text().await.unwrap_or_default();
                    return Err(anyhow!("api error {} for {}: {}", status, url, body));
                }
                Err(err) if attempt < self.max_retries => {
                    warn!(?err, url, attempt, "request failed, backing off");
                    sleep(backoff_delay(self.backoff_seconds, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to reach {url}"));
                }
            }
        }
    }
}

/// Exponential backoff: `backoff_seconds * 2^attempt`, capped at one hour.
fn backoff_delay(backoff_seconds: f64, attempt: u32) -> Duration {
    let secs = backoff_seconds * f64::from(1u32 << attempt.min(20));
    Duration::from_secs_f64(secs.min(3600.0))
}

async fn read_page(res: reqwest::Response) -> Result<ApiPage> {
    let result_count = page_result_count(res.headers())?;
    let next_page = next_page_url(res.headers());
    // A zero-count page has no data worth parsing.
    let records = if result_count == 0 {
        Vec::new()
    } else {
        res.json::<Vec<Map<String, Value>>>()
            .await
            .context("invalid page body, expected a JSON array of records")?
    };
    Ok(ApiPage {
        result_count,
        next_page,
        records,
    })
}

fn page_result_count(headers: &HeaderMap) -> Result<u64> {
    let raw = headers
        .get(RESULT_COUNT_HEADER)
        .ok_or_else(|| anyhow!("response missing {RESULT_COUNT_HEADER} header"))?
        .to_str()
        .context("result-count header is not valid text")?;
    raw.trim()
        .parse()
        .with_context(|| format!("invalid page result count {raw:?}"))
}

fn next_page_url(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NEXT_PAGE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
