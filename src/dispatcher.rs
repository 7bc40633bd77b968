use crate::db::{self, Pool};
use crate::error::with_timeout;
use crate::telegram::Publisher;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Outcome counts of one dispatcher poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub sent: usize,
    pub failed: usize,
}

/// Deliver every pending item due at `now`, oldest first. Each item ends the
/// poll as `sent` or `failed`; one item's failure never stops the rest. Only
/// the initial due-items query can fail the poll as a whole.
#[instrument(skip_all)]
pub async fn process_due_items(
    pool: &Pool,
    publisher: &dyn Publisher,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<PollReport> {
    let due = db::list_due_items(pool, now).await?;
    let mut report = PollReport::default();

    for item in due {
        let res = with_timeout(
            timeout,
            publisher.send(item.media_kind, &item.media_payload, &item.caption),
        )
        .await;
        let recorded = match res {
            Ok(delivery_ref) => {
                report.sent += 1;
                info!(
                    id = item.id,
                    external_id = %item.external_id,
                    delivery_ref = %delivery_ref,
                    "delivered"
                );
                db::mark_sent(pool, item.id, &delivery_ref, Utc::now()).await
            }
            Err(err) => {
                report.failed += 1;
                warn!(%err, id = item.id, external_id = %item.external_id, "delivery failed");
                db::mark_failed(pool, item.id, &err.to_string()).await
            }
        };
        if let Err(err) = recorded {
            error!(?err, id = item.id, "failed to record delivery outcome");
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollabResult, CollaboratorError};
    use crate::model::{ItemStatus, MediaKind, NewScheduledItem, Provenance};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    /// Fails for payloads starting with 0, hangs for payloads starting with 9.
    struct ScriptedPublisher {
        calls: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl Publisher for ScriptedPublisher {
        async fn send(
            &self,
            _kind: MediaKind,
            payload: &[u8],
            _caption: &str,
        ) -> CollabResult<String> {
            self.calls.lock().unwrap().push(payload[0]);
            match payload[0] {
                0 => Err(CollaboratorError::Api {
                    status: 400,
                    message: "bad request".into(),
                }),
                9 => {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Ok("never".into())
                }
                n => Ok(format!("msg-{n}")),
            }
        }
    }

    fn row(first_byte: u8, at: DateTime<Utc>) -> NewScheduledItem {
        NewScheduledItem {
            external_id: format!("ext-{first_byte}"),
            title: None,
            media_kind: MediaKind::Image,
            media_payload: vec![first_byte],
            caption: String::new(),
            scheduled_time: at,
            source_label: "test".into(),
            provenance: Provenance::default(),
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_do_not_block_later_items() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let ago = now - ChronoDuration::minutes(10);
        let ids = db::insert_scheduled_items(
            &pool,
            &[
                row(0, ago - ChronoDuration::minutes(2)),
                row(9, ago - ChronoDuration::minutes(1)),
                row(3, ago),
                row(4, now + ChronoDuration::hours(1)),
            ],
            ago,
        )
        .await
        .unwrap();

        let publisher = ScriptedPublisher {
            calls: Mutex::new(Vec::new()),
        };
        let report = process_due_items(&pool, &publisher, Duration::from_millis(50), now)
            .await
            .unwrap();
        assert_eq!(report, PollReport { sent: 1, failed: 2 });
        assert_eq!(*publisher.calls.lock().unwrap(), vec![0, 9, 3]);

        let failed = db::fetch_item(&pool, ids[0]).await.unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert!(failed.error_message.unwrap().contains("bad request"));

        let timed_out = db::fetch_item(&pool, ids[1]).await.unwrap();
        assert_eq!(timed_out.status, ItemStatus::Failed);
        assert!(timed_out.error_message.unwrap().contains("timed out"));

        let sent = db::fetch_item(&pool, ids[2]).await.unwrap();
        assert_eq!(sent.status, ItemStatus::Sent);
        assert_eq!(sent.delivery_ref.as_deref(), Some("msg-3"));

        let future = db::fetch_item(&pool, ids[3]).await.unwrap();
        assert_eq!(future.status, ItemStatus::Pending);

        // terminal rows are not picked up again
        let again = process_due_items(&pool, &publisher, Duration::from_millis(50), now)
            .await
            .unwrap();
        assert_eq!(again, PollReport::default());
    }
}
