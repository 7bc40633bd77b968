use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tg_autoposter::db;
use tg_autoposter::dispatcher::{process_due_items, PollReport};
use tg_autoposter::error::CollabResult;
use tg_autoposter::model::{ItemStatus, MediaKind, NewScheduledItem, Provenance};
use tg_autoposter::telegram::Publisher;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Debug, Clone)]
struct SendCall {
    kind: MediaKind,
    caption: String,
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    calls: Arc<Mutex<Vec<SendCall>>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn send(&self, kind: MediaKind, _payload: &[u8], caption: &str) -> CollabResult<String> {
        let mut calls = self.calls.lock().await;
        calls.push(SendCall {
            kind,
            caption: caption.to_string(),
        });
        Ok(format!("{}", 100 + calls.len()))
    }
}

fn item(
    external_id: &str,
    kind: MediaKind,
    caption: &str,
    at: chrono::DateTime<Utc>,
) -> NewScheduledItem {
    NewScheduledItem {
        external_id: external_id.into(),
        title: None,
        media_kind: kind,
        media_payload: vec![1, 2, 3],
        caption: caption.into(),
        scheduled_time: at,
        source_label: "reddit:test".into(),
        provenance: Provenance::default(),
    }
}

#[tokio::test]
async fn overdue_item_is_sent_exactly_once() {
    let pool = setup_pool().await;
    let now = Utc::now();
    let ids = db::insert_scheduled_items(
        &pool,
        &[item("x", MediaKind::Image, "A fox.\n\n#fox", now - Duration::minutes(10))],
        now - Duration::hours(2),
    )
    .await
    .unwrap();

    let publisher = RecordingPublisher::default();
    let report = process_due_items(&pool, &publisher, std::time::Duration::from_secs(5), now)
        .await
        .unwrap();
    assert_eq!(report, PollReport { sent: 1, failed: 0 });

    let row = db::fetch_item(&pool, ids[0]).await.unwrap();
    assert_eq!(row.status, ItemStatus::Sent);
    assert_eq!(row.delivery_ref.as_deref(), Some("101"));
    assert!(row.sent_at.is_some());

    let later = now + Duration::minutes(1);
    let again = process_due_items(&pool, &publisher, std::time::Duration::from_secs(5), later)
        .await
        .unwrap();
    assert_eq!(again, PollReport::default());
    assert_eq!(publisher.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn items_go_out_in_schedule_order_with_their_kind() {
    let pool = setup_pool().await;
    let now = Utc::now();
    db::insert_scheduled_items(
        &pool,
        &[item("late", MediaKind::Video, "", now - Duration::minutes(1))],
        now,
    )
    .await
    .unwrap();
    db::insert_scheduled_items(
        &pool,
        &[item("early", MediaKind::Image, "#cat", now - Duration::minutes(30))],
        now,
    )
    .await
    .unwrap();
    db::insert_scheduled_items(
        &pool,
        &[item("future", MediaKind::Animation, "", now + Duration::hours(3))],
        now,
    )
    .await
    .unwrap();

    let publisher = RecordingPublisher::default();
    let report = process_due_items(&pool, &publisher, std::time::Duration::from_secs(5), now)
        .await
        .unwrap();
    assert_eq!(report.sent, 2);

    let calls = publisher.calls.lock().await.clone();
    assert_eq!(calls[0].kind, MediaKind::Image);
    assert_eq!(calls[0].caption, "#cat");
    assert_eq!(calls[1].kind, MediaKind::Video);
    assert_eq!(calls[1].caption, "");

    let counts = db::count_by_status(&pool).await.unwrap();
    assert_eq!((counts.pending, counts.sent, counts.failed), (1, 2, 0));
}
