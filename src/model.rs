use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of media a candidate carries. Decides whether it is enriched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Gallery,
    Video,
    Animation,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Gallery => "gallery",
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "gallery" => Some(MediaKind::Gallery),
            "video" => Some(MediaKind::Video),
            "animation" => Some(MediaKind::Animation),
            _ => None,
        }
    }

    /// Motion media is scheduled as-is, without tagging or captioning.
    pub fn is_motion(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Animation)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Sent,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Sent => "sent",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "sent" => Some(ItemStatus::Sent),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// A piece of media offered by a source before enrichment and scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub external_id: String,
    pub title: Option<String>,
    pub media_kind: MediaKind,
    pub media_refs: Vec<String>,
    pub raw_tags: Vec<String>,
}

/// Row to insert into `scheduled_items`; always starts out `pending`.
#[derive(Debug, Clone)]
pub struct NewScheduledItem {
    pub external_id: String,
    pub title: Option<String>,
    pub media_kind: MediaKind,
    pub media_payload: Vec<u8>,
    pub caption: String,
    pub scheduled_time: DateTime<Utc>,
    pub source_label: String,
    pub provenance: Provenance,
}

/// How an item was enriched, kept for the audit history. All fields stay
/// empty for video and animation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Filtered strategy tags, comma separated.
    pub tags: Option<String>,
    /// Tagging path and caption outcome, e.g. `tagger_extension; caption=accepted`.
    pub tagging_method: Option<String>,
    /// Why the generated caption was rejected, if it was.
    pub caption_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub media_kind: MediaKind,
    #[serde(skip)]
    pub media_payload: Vec<u8>,
    pub caption: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: ItemStatus,
    pub source_label: String,
    #[serde(flatten)]
    pub provenance: Provenance,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_round_trips_through_str() {
        for kind in [
            MediaKind::Image,
            MediaKind::Gallery,
            MediaKind::Video,
            MediaKind::Animation,
        ] {
            assert_eq!(MediaKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MediaKind::parse("gif"), None);
    }

    #[test]
    fn only_video_and_animation_are_motion() {
        assert!(MediaKind::Video.is_motion());
        assert!(MediaKind::Animation.is_motion());
        assert!(!MediaKind::Image.is_motion());
        assert!(!MediaKind::Gallery.is_motion());
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(ItemStatus::parse("sent"), Some(ItemStatus::Sent));
        assert_eq!(ItemStatus::parse("SENT"), None);
    }
}
