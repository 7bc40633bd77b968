use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use tg_autoposter::config;
use tg_autoposter::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print scheduled item counts and the most recent rows")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// How many recent rows to list
    #[arg(long, default_value = "20")]
    limit: i64,
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
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let counts = db::count_by_status(&pool).await?;
    println!(
        "pending: {}  sent: {}  failed: {}  total: {}",
        counts.pending,
        counts.sent,
        counts.failed,
        counts.total()
    );

    for item in db::list_recent_items(&pool, args.limit).await? {
        let detail = match (&item.delivery_ref, &item.error_message) {
            (Some(r), _) => format!("ref={}", r),
            (None, Some(e)) => format!("error={}", e),
            (None, None) => String::new(),
        };
        println!(
            "#{:<5} {:<8} {:<9} {}  {:<24} {} {}",
            item.id,
            item.status.as_str(),
            item.media_kind.as_str(),
            item.scheduled_time.format("%Y-%m-%d %H:%M"),
            item.source_label,
            item.external_id,
            detail
        );
        if let Some(method) = &item.provenance.tagging_method {
            println!("       method: {}", method);
        }
        if let Some(tags) = item.provenance.tags.as_deref().filter(|t| !t.is_empty()) {
            println!("       tags: {}", tags);
        }
        if let Some(note) = &item.provenance.caption_note {
            println!("       caption rejected: {}", note);
        }
    }
    Ok(())
}
