use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::{download_bytes, kind_from_url, Source};
use crate::error::{ensure_success, CollabResult, CollaboratorError};
use crate::model::{CandidateItem, MediaKind};

const REDDIT_BASE: &str = "https://www.reddit.com/";
/// Reddit caps listing pages at 100 entries.
const MAX_LISTING: usize = 100;

/// Newest posts of one subreddit via the public JSON listing.
pub struct RedditSource {
    http: Client,
    base_url: String,
    label: String,
    subreddit: String,
}

impl RedditSource {
    pub fn new(http: Client, label: String, subreddit: String) -> Self {
        Self::with_base_url(http, label, subreddit, REDDIT_BASE.to_string())
    }

    pub fn with_base_url(http: Client, label: String, subreddit: String, base_url: String) -> Self {
        Self {
            http,
            base_url,
            label,
            subreddit,
        }
    }

    fn listing_url(&self, max_count: usize) -> CollabResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .and_then(|b| b.join(&format!("r/{}/new.json", self.subreddit)))
            .map_err(|e| CollaboratorError::Parse(format!("invalid reddit url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("limit", &max_count.clamp(1, MAX_LISTING).to_string())
            .append_pair("raw_json", "1");
        Ok(url)
    }
}

#[async_trait]
impl Source for RedditSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch_candidates(&self, max_count: usize) -> CollabResult<Vec<CandidateItem>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let url = self.listing_url(max_count)?;
        let res = self.http.get(url).send().await?;
        let res = ensure_success(res).await?;
        let body = res.text().await?;
        let listing: Listing = serde_json::from_str(&body)?;
        let items: Vec<CandidateItem> = listing
            .data
            .children
            .into_iter()
            .filter_map(|c| post_to_candidate(c.data))
            .take(max_count)
            .collect();
        debug!(source = %self.label, count = items.len(), "reddit listing parsed");
        Ok(items)
    }

    async fn download(&self, media_ref: &str) -> CollabResult<Vec<u8>> {
        download_bytes(&self.http, media_ref).await
    }
}

/// Map one listing post to a candidate. Self posts and links that are not
/// recognisable media are skipped.
fn post_to_candidate(post: Post) -> Option<CandidateItem> {
    if post.is_self {
        return None;
    }
    let raw_tags = post
        .link_flair_text
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| vec![f.to_string()])
        .unwrap_or_default();

    let (media_kind, media_refs) = if post.is_gallery {
        let refs = gallery_refs(&post);
        if refs.is_empty() {
            return None;
        }
        (MediaKind::Gallery, refs)
    } else if post.is_video {
        let fallback = post
            .secure_media
            .as_ref()
            .and_then(|m| m.reddit_video.as_ref())
            .map(|v| v.fallback_url.clone())?;
        (MediaKind::Video, vec![fallback])
    } else {
        let url = post.url.as_deref()?;
        match kind_from_url(url)? {
            MediaKind::Animation if url.ends_with(".gifv") => (
                MediaKind::Animation,
                vec![format!("{}.mp4", url.trim_end_matches(".gifv"))],
            ),
            kind => (kind, vec![url.to_string()]),
        }
    };

    Some(CandidateItem {
        external_id: post.name,
        title: post.title.filter(|t| !t.trim().is_empty()),
        media_kind,
        media_refs,
        raw_tags,
    })
}

fn gallery_refs(post: &Post) -> Vec<String> {
    let (Some(gallery), Some(meta)) = (&post.gallery_data, &post.media_metadata) else {
        return Vec::new();
    };
    gallery
        .items
        .iter()
        .filter_map(|item| {
            let mime = meta.get(&item.media_id)?.m.as_deref()?;
            let ext = match mime.rsplit_once('/')?.1 {
                "jpeg" => "jpg",
                other => other,
            };
            Some(format!("https://i.redd.it/{}.{}", item.media_id, ext))
        })
        .collect()
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    name: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    is_self: bool,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    is_gallery: bool,
    link_flair_text: Option<String>,
    gallery_data: Option<GalleryData>,
    media_metadata: Option<HashMap<String, MediaMeta>>,
    secure_media: Option<SecureMedia>,
}

#[derive(Deserialize)]
struct GalleryData {
    items: Vec<GalleryItem>,
}

#[derive(Deserialize)]
struct GalleryItem {
    media_id: String,
}

#[derive(Deserialize)]
struct MediaMeta {
    m: Option<String>,
}

#[derive(Deserialize)]
struct SecureMedia {
    reddit_video: Option<RedditVideo>,
}

#[derive(Deserialize)]
struct RedditVideo {
    fallback_url: String,
}
