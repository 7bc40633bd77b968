use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tg_autoposter::config;
use tg_autoposter::db;
use tg_autoposter::enrich::Enricher;
use tg_autoposter::scheduler::{BatchScheduler, ScheduleSettings};
use tg_autoposter::sources;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run a single scheduling cycle and exit")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override schedule.target_count for this run
    #[arg(long)]
    target_count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Some(n) = args.target_count {
        cfg.schedule.target_count = n;
        cfg.schedule.fetch_limit = cfg.schedule.fetch_limit.max(n);
        config::validate(&cfg)?;
    }
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let (primary, fallback) = sources::from_config(&cfg)?;
    let enricher = Enricher::from_config(&cfg)?;
    let mut scheduler = BatchScheduler::new(
        pool,
        primary,
        fallback,
        enricher,
        ScheduleSettings::from_config(&cfg),
    );

    let report = scheduler.run_cycle().await?;
    info!(
        accepted = report.accepted,
        from_fallback = report.from_fallback,
        duplicates = report.duplicates_skipped,
        failures = report.failures,
        "cycle complete"
    );
    for (i, slot) in report.slots.iter().enumerate() {
        let state = if i < report.accepted { "scheduled" } else { "empty" };
        println!("{}  {}", slot.to_rfc3339(), state);
    }
    Ok(())
}
