use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use tg_autoposter::config;
use tg_autoposter::db;
use tg_autoposter::dispatcher;
use tg_autoposter::enrich::Enricher;
use tg_autoposter::scheduler::{BatchScheduler, ScheduleSettings};
use tg_autoposter::sources;
use tg_autoposter::telegram::TelegramPublisher;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    // Publish dispatcher: independent poll loop over due rows.
    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let publisher = TelegramPublisher::new(bot, &cfg.telegram.channel);
    let worker_pool = pool.clone();
    let poll_sleep = cfg.poll_interval();
    let delivery_timeout = cfg.delivery_timeout();
    tokio::spawn(async move {
        loop {
            let now = chrono::Utc::now();
            let polled =
                dispatcher::process_due_items(&worker_pool, &publisher, delivery_timeout, now)
                    .await;
            match polled {
                Ok(report) if report.sent + report.failed > 0 => {
                    info!(sent = report.sent, failed = report.failed, "dispatcher poll finished");
                }
                Ok(_) => {}
                Err(err) => error!(?err, "dispatcher poll failed"),
            }
            tokio::time::sleep(poll_sleep).await;
        }
    });

    let (primary, fallback) = sources::from_config(&cfg)?;
    let enricher = Enricher::from_config(&cfg)?;
    let mut scheduler = BatchScheduler::new(
        pool,
        primary,
        fallback,
        enricher,
        ScheduleSettings::from_config(&cfg),
    );

    // First tick fires immediately, so one cycle runs at startup.
    let cycle_every = Duration::from_secs(cfg.schedule.cycle_interval_minutes * 60);
    let mut ticker = tokio::time::interval(cycle_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("starting batch scheduler");
    loop {
        ticker.tick().await;
        if let Err(err) = scheduler.run_cycle().await {
            error!(?err, "scheduling cycle aborted");
        }
    }
}
