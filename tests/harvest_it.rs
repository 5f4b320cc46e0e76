use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use forum_harvest::db;
use forum_harvest::harvest::{drain_day, harvest_endpoint, FieldFilter, HarvestJob};
use forum_harvest::transport::{ApiPage, ApiTransport};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const BASE_URL: &str = "https://forums.elderscrollsonline.com/api/v2/";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Transport double that replays scripted pages and records every URL it
/// was asked for. Running out of script makes further calls fail, which
/// doubles as a "no unexpected transport call" assertion.
#[derive(Clone, Default)]
struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Result<ApiPage>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn with_responses(responses: Vec<Result<ApiPage>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn push_responses(&self, responses: Vec<Result<ApiPage>>) {
        self.responses.lock().await.extend(responses);
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ApiTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<ApiPage> {
        self.calls.lock().await.push(url.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("unexpected transport call to {url}")))
    }
}

fn records(value: Value) -> Vec<Map<String, Value>> {
    serde_json::from_value(value).unwrap()
}

fn page(records_json: Value, next_page: Option<&str>) -> Result<ApiPage> {
    let records = records(records_json);
    Ok(ApiPage {
        result_count: records.len() as u64,
        next_page: next_page.map(str::to_string),
        records,
    })
}

fn empty_page() -> Result<ApiPage> {
    Ok(ApiPage::default())
}

fn comments_job(fields: FieldFilter) -> HarvestJob {
    HarvestJob {
        base_url: BASE_URL.to_string(),
        endpoint: "comments".to_string(),
        table: "comments".to_string(),
        page_limit: 100,
        fields,
        noise_fields: forum_harvest::sanitize::default_noise_fields(),
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn completion_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM retrieved_dates")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn comments_row_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM \"comments\"")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_day_makes_one_call_and_only_marks_completion() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![empty_page()]);
    let job = comments_job(FieldFilter::None);

    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();

    assert_eq!(
        transport.calls().await,
        vec![format!("{BASE_URL}comments?limit=100&dateInserted=2014-06-24")]
    );
    // No records table was created; only the completion marker was written.
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'comments'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(tables.is_empty());
    assert_eq!(completion_count(&pool).await, 1);
}

#[tokio::test]
async fn single_field_filter_builds_the_expected_url() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![empty_page()]);
    let job = comments_job(FieldFilter::Single("dateInserted".into()));

    harvest_endpoint(
        &transport,
        &job,
        &pool,
        d(2014, 6, 24),
        Some(d(2014, 6, 24)),
    )
    .await
    .unwrap();

    assert_eq!(
        transport.calls().await,
        vec![format!(
            "{BASE_URL}comments?limit=100&dateInserted=2014-06-24&fields=dateInserted"
        )]
    );
}

#[tokio::test]
async fn field_list_is_comma_joined_in_order() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![empty_page()]);
    let job = comments_job(FieldFilter::List(vec!["private".into(), "score".into()]));

    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();

    assert_eq!(
        transport.calls().await,
        vec![format!(
            "{BASE_URL}comments?limit=100&dateInserted=2014-06-24&fields=private,score"
        )]
    );
}

#[tokio::test]
async fn single_page_day_persists_once_and_completes() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![page(
        json!([
            {"commentID": 1, "body": "first"},
            {"commentID": 2, "body": "second"},
        ]),
        None,
    )]);
    let job = comments_job(FieldFilter::None);

    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();

    assert_eq!(transport.calls().await.len(), 1);
    assert_eq!(comments_row_count(&pool).await, 2);
    assert_eq!(completion_count(&pool).await, 1);
}

#[tokio::test]
async fn page_chain_is_fetched_in_pointer_order() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![
        page(json!([{"commentID": 1}]), Some("https://api.test/page-2")),
        page(json!([{"commentID": 2}]), Some("https://api.test/page-3")),
        page(json!([{"commentID": 3}]), None),
    ]);
    let job = comments_job(FieldFilter::None);

    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();

    assert_eq!(
        transport.calls().await,
        vec![
            format!("{BASE_URL}comments?limit=100&dateInserted=2014-06-24"),
            "https://api.test/page-2".to_string(),
            "https://api.test/page-3".to_string(),
        ]
    );
    assert_eq!(comments_row_count(&pool).await, 3);
    assert_eq!(completion_count(&pool).await, 1);
}

#[tokio::test]
async fn noise_fields_never_reach_the_table() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![page(
        json!([{
            "commentID": 1,
            "body": "hello",
            "image": "https://cdn.test/a.png",
            "insertUser": {"userID": 9, "name": "someone"},
            "attributes": {},
        }]),
        None,
    )]);
    let job = comments_job(FieldFilter::None);

    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();

    let columns: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info('comments')")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(columns, vec!["commentID", "body"]);
}

#[tokio::test]
async fn orchestrator_skips_days_already_completed() {
    let pool = setup_pool().await;
    db::record_completed_day(&pool, "comments", "2016-07-29")
        .await
        .unwrap();

    // 2016-07-24..2016-08-01 is nine days; one is already done.
    let transport =
        ScriptedTransport::with_responses((0..8).map(|_| empty_page()).collect());
    let job = comments_job(FieldFilter::None);

    harvest_endpoint(&transport, &job, &pool, d(2016, 7, 24), Some(d(2016, 8, 1)))
        .await
        .unwrap();

    let calls = transport.calls().await;
    assert_eq!(calls.len(), 8);
    assert!(calls.iter().all(|url| !url.contains("2016-07-29")));
    assert_eq!(completion_count(&pool).await, 9);
}

#[tokio::test]
async fn completed_range_rerun_makes_zero_transport_calls() {
    let pool = setup_pool().await;
    let transport =
        ScriptedTransport::with_responses((0..3).map(|_| empty_page()).collect());
    let job = comments_job(FieldFilter::None);

    harvest_endpoint(&transport, &job, &pool, d(2016, 7, 24), Some(d(2016, 7, 26)))
        .await
        .unwrap();
    assert_eq!(transport.calls().await.len(), 3);

    // Script is exhausted, so any further transport call would fail the run.
    harvest_endpoint(&transport, &job, &pool, d(2016, 7, 24), Some(d(2016, 7, 26)))
        .await
        .unwrap();
    assert_eq!(transport.calls().await.len(), 3);
}

#[tokio::test]
async fn transport_failure_leaves_the_day_unmarked() {
    let pool = setup_pool().await;
    let transport =
        ScriptedTransport::with_responses(vec![Err(anyhow!("retries exhausted: 504"))]);
    let job = comments_job(FieldFilter::None);

    let result = drain_day(&transport, &job, "2014-06-24", &pool).await;
    assert!(result.is_err());
    assert_eq!(completion_count(&pool).await, 0);
}

#[tokio::test]
async fn failure_mid_pagination_keeps_partial_rows_but_no_marker() {
    let pool = setup_pool().await;
    let transport = ScriptedTransport::with_responses(vec![
        page(json!([{"commentID": 1}]), Some("https://api.test/page-2")),
        Err(anyhow!("retries exhausted: 504")),
    ]);
    let job = comments_job(FieldFilter::None);

    let result = drain_day(&transport, &job, "2014-06-24", &pool).await;
    assert!(result.is_err());
    // At-least-once: the first page's rows stay, the day stays unmarked,
    // and a re-run starts again from page one.
    assert_eq!(comments_row_count(&pool).await, 1);
    assert_eq!(completion_count(&pool).await, 0);

    transport
        .push_responses(vec![
            page(json!([{"commentID": 1}]), Some("https://api.test/page-2")),
            page(json!([{"commentID": 2}]), None),
        ])
        .await;
    drain_day(&transport, &job, "2014-06-24", &pool).await.unwrap();
    assert_eq!(comments_row_count(&pool).await, 3);
    assert_eq!(completion_count(&pool).await, 1);
}
