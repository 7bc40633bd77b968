//! Ranked content feeds that offer candidate items to the batch scheduler.
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::{Config, Fetch, SourceConfig};
use crate::error::{ensure_success, CollabResult};
use crate::model::{CandidateItem, MediaKind};

pub mod feed;
pub mod reddit;

pub use feed::JsonFeedSource;
pub use reddit::RedditSource;

/// A content feed. Returns candidates most-recent-first; fewer than asked
/// (including none) when exhausted. "No results" is never an error.
#[async_trait]
pub trait Source: Send + Sync {
    /// Recorded as `source_label` on every row this source produces.
    fn label(&self) -> &str;

    async fn fetch_candidates(&self, max_count: usize) -> CollabResult<Vec<CandidateItem>>;

    /// Fetch the raw bytes behind one of this source's media refs.
    async fn download(&self, media_ref: &str) -> CollabResult<Vec<u8>>;
}

/// Shared HTTP client for all feeds; the per-call timeout comes from `fetch`.
pub fn http_client(fetch: &Fetch) -> CollabResult<Client> {
    Ok(Client::builder()
        .user_agent(fetch.user_agent.clone())
        .timeout(Duration::from_secs(fetch.timeout_seconds))
        .build()?)
}

pub fn build_source(http: &Client, cfg: &SourceConfig) -> Box<dyn Source> {
    match cfg {
        SourceConfig::Reddit { label, subreddit } => {
            Box::new(RedditSource::new(http.clone(), label.clone(), subreddit.clone()))
        }
        SourceConfig::JsonFeed { label, url } => {
            Box::new(JsonFeedSource::new(http.clone(), label.clone(), url.clone()))
        }
    }
}

/// Build the ranked primary sources and the fallback from configuration.
pub fn from_config(cfg: &Config) -> CollabResult<(Vec<Box<dyn Source>>, Box<dyn Source>)> {
    let http = http_client(&cfg.fetch)?;
    let primary = cfg
        .sources
        .primary
        .iter()
        .map(|s| build_source(&http, s))
        .collect();
    let fallback = build_source(&http, &cfg.sources.fallback);
    Ok((primary, fallback))
}

pub(crate) async fn download_bytes(http: &Client, url: &str) -> CollabResult<Vec<u8>> {
    let res = http.get(url).send().await?;
    let res = ensure_success(res).await?;
    Ok(res.bytes().await?.to_vec())
}

/// Guess the media kind from a URL's file extension, ignoring query strings.
pub(crate) fn kind_from_url(url: &str) -> Option<MediaKind> {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" => Some(MediaKind::Image),
        "gif" | "gifv" => Some(MediaKind::Animation),
        "mp4" | "webm" => Some(MediaKind::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_url_uses_extension() {
        assert_eq!(kind_from_url("https://i.redd.it/a.JPG"), Some(MediaKind::Image));
        assert_eq!(
            kind_from_url("https://cdn.example/x.gif?width=200"),
            Some(MediaKind::Animation)
        );
        assert_eq!(kind_from_url("https://v.example/clip.mp4"), Some(MediaKind::Video));
        assert_eq!(kind_from_url("https://www.reddit.com/r/pics/comments/1"), None);
    }

    #[test]
    fn from_config_keeps_rank_order() {
        let cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        let (primary, fallback) = from_config(&cfg).unwrap();
        let labels: Vec<&str> = primary.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["reddit:awwnime", "reddit:pixelart"]);
        assert_eq!(fallback.label(), "waifu.im");
    }
}
