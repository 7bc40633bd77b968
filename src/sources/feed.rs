use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{download_bytes, kind_from_url, Source};
use crate::error::{ensure_success, CollabResult, CollaboratorError};
use crate::model::{CandidateItem, MediaKind};

/// Image API in the waifu.im shape:
/// `{"images": [{"image_id": .., "url": .., "tags": [{"name": ..}]}]}`.
pub struct JsonFeedSource {
    http: Client,
    label: String,
    url: String,
}

impl JsonFeedSource {
    pub fn new(http: Client, label: String, url: String) -> Self {
        Self { http, label, url }
    }

    fn request_url(&self, max_count: usize) -> CollabResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| CollaboratorError::Parse(format!("invalid feed url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("limit", &max_count.to_string());
        Ok(url)
    }
}

#[async_trait]
impl Source for JsonFeedSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch_candidates(&self, max_count: usize) -> CollabResult<Vec<CandidateItem>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let res = self.http.get(self.request_url(max_count)?).send().await?;
        let res = ensure_success(res).await?;
        let body: FeedResponse = serde_json::from_str(&res.text().await?)?;
        Ok(body
            .images
            .into_iter()
            .filter_map(entry_to_candidate)
            .take(max_count)
            .collect())
    }

    async fn download(&self, media_ref: &str) -> CollabResult<Vec<u8>> {
        download_bytes(&self.http, media_ref).await
    }
}

fn entry_to_candidate(entry: FeedImage) -> Option<CandidateItem> {
    let url = entry.url.filter(|u| !u.trim().is_empty())?;
    // image_id is numeric on some deployments and a string on others
    let external_id = match entry.image_id {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => url.clone(),
    };
    let media_kind = kind_from_url(&url).unwrap_or(MediaKind::Image);
    let raw_tags = entry
        .tags
        .into_iter()
        .filter_map(|t| t.name)
        .filter(|n| !n.trim().is_empty())
        .collect();
    Some(CandidateItem {
        external_id,
        title: None,
        media_kind,
        media_refs: vec![url],
        raw_tags,
    })
}

#[derive(Deserialize)]
struct FeedResponse {
    #[serde(default)]
    images: Vec<FeedImage>,
}

#[derive(Deserialize)]
struct FeedImage {
    image_id: Option<Value>,
    url: Option<String>,
    #[serde(default)]
    tags: Vec<FeedTag>,
}

#[derive(Deserialize)]
struct FeedTag {
    name: Option<String>,
}
