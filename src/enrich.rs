//! Tagging + captioning of image/gallery candidates.
//!
//! Every failure degrades: a dead tagger falls through to the next strategy,
//! a dead or rejecting captioner yields an empty caption. `enrich` never
//! returns an error; the `method` label records which path was taken.
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tracing::{info, warn};

use crate::caption::{Captioner, ChatCaptioner};
use crate::config::Config;
use crate::error::{with_timeout, CollabResult};
use crate::tagging::{InterrogateTagger, TagSet, Tagger, TaggerExtension};
use crate::tags;

/// Used when neither tagging strategy produced anything, so captioning still
/// has some signal to work from.
pub const GENERIC_TAGS: &[&str] = &["art", "illustration", "artwork"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub caption: String,
    /// Strategy tags after the tag filter; rendered as hashtags.
    pub filtered_tags: Vec<String>,
    pub method: String,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnrichSettings {
    pub tag_timeout: Duration,
    pub caption_timeout: Duration,
    pub hashtag_limit: usize,
    /// How many recent rejected captions to remember as negative examples.
    pub negative_examples: usize,
}

impl EnrichSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tag_timeout: Duration::from_secs(cfg.tagging.timeout_seconds),
            caption_timeout: Duration::from_secs(cfg.caption.timeout_seconds),
            hashtag_limit: tags::DEFAULT_LIMIT,
            negative_examples: cfg.caption.negative_examples,
        }
    }
}

pub struct Enricher {
    /// Present only when the high-precision strategy is enabled.
    high_precision: Option<Box<dyn Tagger>>,
    fallback: Box<dyn Tagger>,
    captioner: Box<dyn Captioner>,
    settings: EnrichSettings,
    recent_rejections: VecDeque<String>,
}

impl Enricher {
    pub fn new(
        high_precision: Option<Box<dyn Tagger>>,
        fallback: Box<dyn Tagger>,
        captioner: Box<dyn Captioner>,
        settings: EnrichSettings,
    ) -> Self {
        Self {
            high_precision,
            fallback,
            captioner,
            settings,
            recent_rejections: VecDeque::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> CollabResult<Self> {
        let high_precision: Option<Box<dyn Tagger>> = if cfg.tagging.high_precision_enabled {
            Some(Box::new(TaggerExtension::from_config(&cfg.tagging)?))
        } else {
            None
        };
        Ok(Self::new(
            high_precision,
            Box::new(InterrogateTagger::from_config(&cfg.tagging)?),
            Box::new(ChatCaptioner::from_config(&cfg.caption)?),
            EnrichSettings::from_config(cfg),
        ))
    }

    /// Takes `&mut self`: candidates are enriched strictly one at a time.
    pub async fn enrich(&mut self, image: &[u8], raw_tags: &[String]) -> Enrichment {
        let strategy = self.strategy_tags(image).await;
        let merged = merge_tags(&strategy.tags, raw_tags);

        let negatives: Vec<String> = self.recent_rejections.iter().cloned().collect();
        let outcome = with_timeout(
            self.settings.caption_timeout,
            self.captioner.caption(&merged, &negatives),
        )
        .await;

        let (caption, caption_path, rejection_reason) = match outcome {
            Ok(out) if out.accepted => (out.text, "accepted", None),
            Ok(out) => {
                let reason = out
                    .rejection_reason
                    .unwrap_or_else(|| "rejected".to_string());
                info!(reason = %reason, "caption rejected");
                self.remember_rejection(out.text);
                (String::new(), "rejected", Some(reason))
            }
            Err(err) => {
                warn!(%err, "caption generation failed");
                (String::new(), "failed", None)
            }
        };

        Enrichment {
            caption,
            filtered_tags: tags::filter(&strategy.tags, self.settings.hashtag_limit),
            method: format!("{}; caption={}", strategy.method, caption_path),
            rejection_reason,
        }
    }

    async fn strategy_tags(&self, image: &[u8]) -> TagSet {
        if let Some(tagger) = &self.high_precision {
            match with_timeout(self.settings.tag_timeout, tagger.tag(image)).await {
                Ok(set) if !set.tags.is_empty() => return set,
                Ok(_) => info!("high-precision tagger returned no tags; falling back"),
                Err(err) => warn!(%err, "high-precision tagger failed; falling back"),
            }
        }
        match with_timeout(self.settings.tag_timeout, self.fallback.tag(image)).await {
            Ok(set) if !set.tags.is_empty() => set,
            Ok(set) => {
                info!(method = %set.method, "fallback tagger returned no tags; using generic tags");
                generic_tags()
            }
            Err(err) => {
                warn!(%err, "fallback tagger failed; using generic tags");
                generic_tags()
            }
        }
    }

    fn remember_rejection(&mut self, text: String) {
        if self.settings.negative_examples == 0 || text.trim().is_empty() {
            return;
        }
        if self.recent_rejections.len() == self.settings.negative_examples {
            self.recent_rejections.pop_front();
        }
        self.recent_rejections.push_back(text);
    }
}

fn generic_tags() -> TagSet {
    TagSet {
        tags: GENERIC_TAGS.iter().map(|t| t.to_string()).collect(),
        method: "generic_fallback".into(),
    }
}

/// Order-preserving union: strategy tags first, then unseen raw tags.
pub fn merge_tags(strategy: &[String], raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    strategy
        .iter()
        .chain(raw.iter())
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

/// Final post caption: description, a blank line, then hashtags; either part
/// may be missing. Cut on a char boundary to Telegram's caption limit.
pub fn compose_caption(description: &str, filtered_tags: &[String]) -> String {
    let description = description.trim();
    let hashtags = tags::hashtags(filtered_tags);
    let text = match (description.is_empty(), hashtags.is_empty()) {
        (false, false) => format!("{}\n\n{}", description, hashtags),
        (false, true) => description.to_string(),
        (true, false) => hashtags,
        (true, true) => String::new(),
    };
    truncate_chars(&text, crate::telegram::CAPTION_LIMIT)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
