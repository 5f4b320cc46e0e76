use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use forum_harvest::harvest::{harvest_endpoint, FieldFilter, HarvestJob};
use forum_harvest::transport::ForumClient;
use forum_harvest::{config, db};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// API endpoint to harvest, e.g. comments or discussions
    endpoint: String,

    /// Earliest date to pull records from (YYYY-MM-DD); defaults to the
    /// configured start date
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Latest date to pull records from (YYYY-MM-DD); defaults to today
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Request only this field from the API; repeat for several fields
    #[arg(long = "field")]
    fields: Vec<String>,

    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let transport = ForumClient::from_config(&cfg);
    let job = HarvestJob {
        base_url: cfg.api.base_url.clone(),
        endpoint: args.endpoint.clone(),
        table: args.endpoint.clone(),
        page_limit: cfg.api.page_limit,
        fields: FieldFilter::from_names(&args.fields),
        noise_fields: cfg.harvest.noise_fields.clone(),
    };
    let start_date = args.start_date.unwrap_or(cfg.harvest.default_start_date);

    info!(endpoint = %args.endpoint, %start_date, "starting harvest");
    harvest_endpoint(&transport, &job, &pool, start_date, args.end_date).await?;
    info!(endpoint = %args.endpoint, "harvest finished");

    Ok(())
}
