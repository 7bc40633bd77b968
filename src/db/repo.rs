use super::model::StatusCounts;
use crate::model::{ItemStatus, MediaKind, NewScheduledItem, Provenance, ScheduledItem};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

const ITEM_COLUMNS: &str = "id, external_id, title, media_kind, media_payload, caption, \
     scheduled_time, status, source_label, tags, tagging_method, caption_note, error_message, \
     created_at, sent_at, delivery_ref";

/// Fixed-width RFC 3339 (nanoseconds, `Z`), so `scheduled_time` orders and
/// compares correctly as plain text.
fn slot_text(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists, and make sure the file gets created. Leaves in-memory
/// URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// True iff a dedup marker exists for `external_id`.
#[instrument(skip_all)]
pub async fn has_processed(pool: &Pool, external_id: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM processed_items WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Idempotent: a second mark for the same id keeps the original timestamp.
#[instrument(skip_all)]
pub async fn mark_processed(pool: &Pool, external_id: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO processed_items (external_id, processed_at) VALUES (?, ?)")
        .bind(external_id)
        .bind(at)
        .execute(pool)
        .await
        .context("failed to persist dedup marker")?;
    Ok(())
}

/// Insert all rows for one candidate in a single transaction and return their
/// ids in insertion order.
pub async fn insert_scheduled_items(
    pool: &Pool,
    items: &[NewScheduledItem],
    created_at: DateTime<Utc>,
) -> Result<Vec<i64>> {
    insert_scheduled_items_with_mark(pool, items, created_at, None).await
}

/// Like [`insert_scheduled_items`], and when `dedup_mark` is set also writes
/// that dedup marker in the same transaction: either the rows and the marker
/// both land, or neither does.
#[instrument(skip_all)]
pub async fn insert_scheduled_items_with_mark(
    pool: &Pool,
    items: &[NewScheduledItem],
    created_at: DateTime<Utc>,
    dedup_mark: Option<&str>,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let rec = sqlx::query(
            "INSERT INTO scheduled_items (external_id, title, media_kind, media_payload, caption, \
             scheduled_time, status, source_label, tags, tagging_method, caption_note, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&item.external_id)
        .bind(item.title.as_deref())
        .bind(item.media_kind.as_str())
        .bind(&item.media_payload)
        .bind(&item.caption)
        .bind(slot_text(item.scheduled_time))
        .bind(ItemStatus::Pending.as_str())
        .bind(&item.source_label)
        .bind(item.provenance.tags.as_deref())
        .bind(item.provenance.tagging_method.as_deref())
        .bind(item.provenance.caption_note.as_deref())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert scheduled item")?;
        ids.push(rec.get::<i64, _>("id"));
    }
    if let Some(external_id) = dedup_mark {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_items (external_id, processed_at) VALUES (?, ?)",
        )
        .bind(external_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("failed to persist dedup marker")?;
    }
    tx.commit().await.context("failed to commit scheduled items")?;
    Ok(ids)
}

/// Pending rows whose `scheduled_time` is at or before `now`, oldest first.
#[instrument(skip_all)]
pub async fn list_due_items(pool: &Pool, now: DateTime<Utc>) -> Result<Vec<ScheduledItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM scheduled_items \
         WHERE status = 'pending' AND scheduled_time <= ? \
         ORDER BY scheduled_time ASC, id ASC"
    );
    let rows = sqlx::query(&sql).bind(slot_text(now)).fetch_all(pool).await?;
    rows.iter().map(row_to_item).collect()
}

pub async fn fetch_item(pool: &Pool, id: i64) -> Result<ScheduledItem> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM scheduled_items WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    let Some(row) = row else {
        return Err(anyhow!("scheduled item {} not found", id));
    };
    row_to_item(&row)
}

/// Most recently scheduled rows first, without payloads.
pub async fn list_recent_items(pool: &Pool, limit: i64) -> Result<Vec<ScheduledItem>> {
    let sql = format!(
        "SELECT {} FROM scheduled_items ORDER BY scheduled_time DESC, id DESC LIMIT ?",
        ITEM_COLUMNS.replace("media_payload", "X'' AS media_payload")
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(row_to_item).collect()
}

/// pending -> sent. Only a pending row moves; returns whether it did.
#[instrument(skip_all)]
pub async fn mark_sent(
    pool: &Pool,
    id: i64,
    delivery_ref: &str,
    sent_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE scheduled_items \
         SET status = 'sent', delivery_ref = ?, sent_at = ?, error_message = NULL \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(delivery_ref)
    .bind(sent_at)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark scheduled item sent")?;
    Ok(res.rows_affected() == 1)
}

/// pending -> failed. Only a pending row moves; returns whether it did.
#[instrument(skip_all)]
pub async fn mark_failed(pool: &Pool, id: i64, error_message: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE scheduled_items SET status = 'failed', error_message = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark scheduled item failed")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn count_by_status(pool: &Pool) -> Result<StatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM scheduled_items GROUP BY status")
            .fetch_all(pool)
            .await?;
    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        match ItemStatus::parse(&status) {
            Some(ItemStatus::Pending) => counts.pending = n,
            Some(ItemStatus::Sent) => counts.sent = n,
            Some(ItemStatus::Failed) => counts.failed = n,
            None => return Err(anyhow!("unknown status {} in scheduled_items", status)),
        }
    }
    Ok(counts)
}

fn row_to_item(row: &SqliteRow) -> Result<ScheduledItem> {
    let id: i64 = row.get("id");
    let kind_str: String = row.get("media_kind");
    let media_kind = MediaKind::parse(&kind_str)
        .ok_or_else(|| anyhow!("scheduled item {} has unknown media kind {}", id, kind_str))?;
    let status_str: String = row.get("status");
    let status = ItemStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("scheduled item {} has unknown status {}", id, status_str))?;

    Ok(ScheduledItem {
        id,
        external_id: row.get("external_id"),
        title: row.try_get::<Option<String>, _>("title")?,
        media_kind,
        media_payload: row.get("media_payload"),
        caption: row.get("caption"),
        scheduled_time: row.try_get("scheduled_time")?,
        status,
        source_label: row.get("source_label"),
        provenance: Provenance {
            tags: row.try_get::<Option<String>, _>("tags")?,
            tagging_method: row.try_get::<Option<String>, _>("tagging_method")?,
            caption_note: row.try_get::<Option<String>, _>("caption_note")?,
        },
        error_message: row.try_get::<Option<String>, _>("error_message")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get::<Option<DateTime<Utc>>, _>("sent_at")?,
        delivery_ref: row.try_get::<Option<String>, _>("delivery_ref")?,
    })
}
