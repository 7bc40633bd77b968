//! One scheduling cycle: walk the ranked sources, skip already-processed
//! items, enrich and persist up to `target_count` items into precomputed
//! publish slots, then top up from the fallback source.
//!
//! Candidates are handled strictly one after another. Enrichment load on the
//! tagging/captioning backends stays bounded to a single request, and dedup
//! markers are written in acceptance order.
use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::enrich::{compose_caption, Enricher};
use crate::model::{CandidateItem, NewScheduledItem, Provenance};
use crate::sources::Source;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub target_count: usize,
    pub cadence: Duration,
    pub lead_time: Duration,
    /// Candidates requested per source call.
    pub fetch_limit: usize,
}

impl ScheduleSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let s = &cfg.schedule;
        Self {
            target_count: s.target_count,
            cadence: Duration::minutes(s.cadence_minutes as i64),
            lead_time: Duration::minutes(s.lead_time_minutes as i64),
            fetch_limit: s.fetch_limit,
        }
    }
}

/// Summary of one cycle, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accepted: usize,
    pub from_fallback: usize,
    pub fallback_used: bool,
    pub duplicates_skipped: usize,
    pub failures: usize,
    pub scheduled_ids: Vec<i64>,
    pub slots: Vec<DateTime<Utc>>,
}

/// Round up to the next whole hour; exact hours are returned unchanged.
pub fn ceil_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let hour = Duration::hours(1);
    match t.duration_trunc(hour) {
        Ok(floor) if floor == t => t,
        Ok(floor) => floor + hour,
        Err(_) => t,
    }
}

/// `slot[0] = ceil_to_hour(now) + lead_time`, then one slot every `cadence`.
pub fn compute_slots(now: DateTime<Utc>, settings: &ScheduleSettings) -> Vec<DateTime<Utc>> {
    let first = ceil_to_hour(now) + settings.lead_time;
    (0..settings.target_count)
        .map(|i| first + settings.cadence * i as i32)
        .collect()
}

pub struct BatchScheduler {
    pool: Pool,
    primary: Vec<Box<dyn Source>>,
    fallback: Box<dyn Source>,
    enricher: Enricher,
    settings: ScheduleSettings,
}

impl BatchScheduler {
    pub fn new(
        pool: Pool,
        primary: Vec<Box<dyn Source>>,
        fallback: Box<dyn Source>,
        enricher: Enricher,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            pool,
            primary,
            fallback,
            enricher,
            settings,
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as if started at `now`. Only persistence errors on the
    /// dedup store escape; everything else is handled per source or per item.
    #[instrument(skip_all)]
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let Self {
            pool,
            primary,
            fallback,
            enricher,
            settings,
        } = self;
        let slots = compute_slots(now, settings);
        let target = settings.target_count;
        let mut report = CycleReport {
            slots: slots.clone(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for source in primary.iter() {
            if report.accepted >= target {
                break;
            }
            let candidates = fetch_or_empty(source.as_ref(), settings.fetch_limit).await;
            for item in candidates {
                if report.accepted >= target {
                    break;
                }
                if !seen.insert(item.external_id.clone())
                    || db::has_processed(pool, &item.external_id).await?
                {
                    report.duplicates_skipped += 1;
                    continue;
                }
                let slot = slots[report.accepted];
                let attempt = Attempt {
                    source: source.as_ref(),
                    item: &item,
                    slot,
                    mark_processed: true,
                };
                match try_schedule(pool, enricher, attempt, now).await {
                    Some(ids) => {
                        report.accepted += 1;
                        report.scheduled_ids.extend(ids);
                    }
                    // unmarked, so a later cycle offers it again
                    None => report.failures += 1,
                }
            }
        }

        if report.accepted < target {
            report.fallback_used = true;
            info!(
                accepted = report.accepted,
                target,
                source = fallback.label(),
                "target not met from ranked sources; using fallback"
            );
            let candidates = fetch_or_empty(fallback.as_ref(), settings.fetch_limit).await;
            for item in candidates {
                if report.accepted >= target {
                    break;
                }
                // checked against the dedup store, but never marked
                if !seen.insert(item.external_id.clone())
                    || db::has_processed(pool, &item.external_id).await?
                {
                    report.duplicates_skipped += 1;
                    continue;
                }
                let slot = slots[report.accepted];
                let attempt = Attempt {
                    source: fallback.as_ref(),
                    item: &item,
                    slot,
                    mark_processed: false,
                };
                match try_schedule(pool, enricher, attempt, now).await {
                    Some(ids) => {
                        report.accepted += 1;
                        report.from_fallback += 1;
                        report.scheduled_ids.extend(ids);
                    }
                    None => report.failures += 1,
                }
            }
        }

        info!(
            accepted = report.accepted,
            target,
            from_fallback = report.from_fallback,
            duplicates = report.duplicates_skipped,
            failures = report.failures,
            "cycle finished"
        );
        Ok(report)
    }
}

/// A dead source counts as a source with nothing to offer.
async fn fetch_or_empty(source: &dyn Source, limit: usize) -> Vec<CandidateItem> {
    match source.fetch_candidates(limit).await {
        Ok(items) => {
            info!(source = source.label(), count = items.len(), "fetched candidates");
            items
        }
        Err(err) => {
            warn!(%err, source = source.label(), "source fetch failed; treating as empty");
            Vec::new()
        }
    }
}

/// One candidate to place into `slot`.
struct Attempt<'a> {
    source: &'a dyn Source,
    item: &'a CandidateItem,
    slot: DateTime<Utc>,
    /// Write the dedup marker in the same transaction as the rows.
    mark_processed: bool,
}

/// Download, enrich (images/galleries only) and persist one candidate.
/// Returns the inserted row ids, or `None` when the item must be retried on a
/// later cycle.
async fn try_schedule(
    pool: &Pool,
    enricher: &mut Enricher,
    attempt: Attempt<'_>,
    now: DateTime<Utc>,
) -> Option<Vec<i64>> {
    let Attempt {
        source,
        item,
        slot,
        mark_processed,
    } = attempt;
    if item.media_refs.is_empty() {
        warn!(external_id = %item.external_id, "candidate has no media; skipping");
        return None;
    }

    let mut payloads = Vec::with_capacity(item.media_refs.len());
    for media_ref in &item.media_refs {
        match source.download(media_ref).await {
            Ok(bytes) => payloads.push(bytes),
            Err(err) => {
                warn!(
                    %err,
                    external_id = %item.external_id,
                    media_ref = %media_ref,
                    "media download failed"
                );
                return None;
            }
        }
    }

    let (caption, provenance) = if item.media_kind.is_motion() {
        (String::new(), Provenance::default())
    } else {
        let enrichment = enricher.enrich(&payloads[0], &item.raw_tags).await;
        info!(
            external_id = %item.external_id,
            method = %enrichment.method,
            tags = enrichment.filtered_tags.len(),
            "enriched candidate"
        );
        let caption = compose_caption(&enrichment.caption, &enrichment.filtered_tags);
        let provenance = Provenance {
            tags: Some(enrichment.filtered_tags.join(", ")),
            tagging_method: Some(enrichment.method),
            caption_note: enrichment.rejection_reason,
        };
        (caption, provenance)
    };

    let rows: Vec<NewScheduledItem> = payloads
        .into_iter()
        .enumerate()
        .map(|(i, media_payload)| NewScheduledItem {
            external_id: item.external_id.clone(),
            title: item.title.clone(),
            media_kind: item.media_kind,
            media_payload,
            caption: if i == 0 { caption.clone() } else { String::new() },
            scheduled_time: slot,
            source_label: source.label().to_string(),
            provenance: provenance.clone(),
        })
        .collect();

    let mark = mark_processed.then_some(item.external_id.as_str());
    match db::insert_scheduled_items_with_mark(pool, &rows, now, mark).await {
        Ok(ids) => {
            info!(
                external_id = %item.external_id,
                kind = item.media_kind.as_str(),
                %slot,
                rows = ids.len(),
                "scheduled item"
            );
            Some(ids)
        }
        Err(err) => {
            warn!(?err, external_id = %item.external_id, "failed to persist scheduled item");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings(target: usize) -> ScheduleSettings {
        ScheduleSettings {
            target_count: target,
            cadence: Duration::hours(3),
            lead_time: Duration::hours(1),
            fetch_limit: 50,
        }
    }

    #[test]
    fn ceil_to_hour_rounds_up_only_off_boundary() {
        let exact = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(ceil_to_hour(exact), exact);
        let off = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 1).unwrap();
        assert_eq!(ceil_to_hour(off), Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        assert_eq!(ceil_to_hour(late), Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn slots_are_spaced_by_cadence_and_start_after_lead_time() {
        let starts = [
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 17, 42).unwrap(),
            Utc.with_ymd_and_hms(2026, 12, 31, 23, 30, 0).unwrap(),
        ];
        for now in starts {
            let s = settings(8);
            let slots = compute_slots(now, &s);
            assert_eq!(slots.len(), 8);
            assert!(slots[0] >= now + s.lead_time);
            assert!(slots[0] < now + s.lead_time + Duration::hours(1));
            for pair in slots.windows(2) {
                assert_eq!(pair[1] - pair[0], s.cadence);
            }
        }
    }

    #[test]
    fn zero_target_yields_no_slots() {
        assert!(compute_slots(Utc::now(), &settings(0)).is_empty());
    }
}
