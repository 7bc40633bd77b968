//! Image tagging backends on a Stable Diffusion WebUI instance.
//!
//! Two strategies are exposed through the same [`Tagger`] trait:
//! - [`TaggerExtension`]: the WD14 tagger extension, weighted and precise.
//! - [`InterrogateTagger`]: the built-in interrogate endpoint, tried model by
//!   model until one yields usable tags.
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Tagging as TaggingConfig;
use crate::error::{ensure_success, CollabResult, CollaboratorError};

/// Tags produced by one strategy plus a label naming the path taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub tags: Vec<String>,
    pub method: String,
}

impl TagSet {
    pub fn empty(method: impl Into<String>) -> Self {
        Self {
            tags: Vec::new(),
            method: method.into(),
        }
    }
}

/// An empty tag list means "no tags"; errors are reserved for transport
/// and decoding failures.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, image: &[u8]) -> CollabResult<TagSet>;
}

/// `(tag:1.2)` weight syntax and `\(` escapes as emitted by deepbooru.
static WEIGHTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\((.+?)(?::[0-9.]+)?\)$").expect("static regex"));

fn data_url(image: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(image))
}

fn sd_client(timeout: Duration) -> CollabResult<Client> {
    Ok(Client::builder()
        .user_agent("tg-autoposter/0.1")
        .timeout(timeout)
        .build()?)
}

pub struct TaggerExtension {
    http: Client,
    base_url: String,
    threshold: f64,
    max_tags: usize,
}

impl TaggerExtension {
    pub fn from_config(cfg: &TaggingConfig) -> CollabResult<Self> {
        Ok(Self {
            http: sd_client(Duration::from_secs(cfg.timeout_seconds))?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            threshold: cfg.threshold,
            max_tags: cfg.max_tags,
        })
    }
}

#[async_trait]
impl Tagger for TaggerExtension {
    async fn tag(&self, image: &[u8]) -> CollabResult<TagSet> {
        let payload = json!({ "image": data_url(image), "threshold": self.threshold });
        let res = self
            .http
            .post(format!("{}/tagger/v1/interrogate", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let body: Value = ensure_success(res).await?.json().await?;
        let tags = weighted_tags(&body, self.threshold, self.max_tags);
        debug!(count = tags.len(), "tagger extension responded");
        Ok(TagSet {
            tags,
            method: "tagger_extension".into(),
        })
    }
}

/// Pull `{tag: weight}` pairs out of a tagger response, keep those above
/// `threshold`, strongest first.
fn weighted_tags(body: &Value, threshold: f64, max_tags: usize) -> Vec<String> {
    let weights: Option<&Map<String, Value>> = body
        .get("tags")
        .and_then(Value::as_object)
        .or_else(|| {
            let caption = body.get("caption")?.as_object()?;
            // newer extension versions nest general tags under "tag"
            caption.get("tag").and_then(Value::as_object).or(Some(caption))
        });
    let Some(weights) = weights else {
        return Vec::new();
    };
    let mut scored: Vec<(&String, f64)> = weights
        .iter()
        .filter_map(|(tag, w)| w.as_f64().map(|w| (tag, w)))
        .filter(|(_, w)| *w > threshold)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
        .into_iter()
        .take(max_tags)
        .map(|(t, _)| t.clone())
        .collect()
}

pub struct InterrogateTagger {
    http: Client,
    base_url: String,
    models: Vec<String>,
}

impl InterrogateTagger {
    pub fn from_config(cfg: &TaggingConfig) -> CollabResult<Self> {
        Ok(Self {
            http: sd_client(Duration::from_secs(cfg.timeout_seconds))?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            models: cfg.interrogate_models.clone(),
        })
    }

    async fn interrogate(&self, image: &str, model: &str) -> CollabResult<Vec<String>> {
        let res = self
            .http
            .post(format!("{}/sdapi/v1/interrogate", self.base_url))
            .json(&json!({ "image": image, "model": model }))
            .send()
            .await?;
        let body: Value = ensure_success(res).await?.json().await?;
        let caption = body
            .get("caption")
            .and_then(Value::as_str)
            .ok_or_else(|| CollaboratorError::Parse("interrogate response has no caption".into()))?;
        Ok(split_caption(caption))
    }
}

#[async_trait]
impl Tagger for InterrogateTagger {
    async fn tag(&self, image: &[u8]) -> CollabResult<TagSet> {
        let image = data_url(image);
        let mut last_err = None;
        for model in &self.models {
            match self.interrogate(&image, model).await {
                Ok(tags) if !tags.is_empty() => {
                    return Ok(TagSet {
                        tags,
                        method: model.clone(),
                    })
                }
                Ok(_) => debug!(model = %model, "interrogate returned no usable tags"),
                Err(err) => {
                    warn!(%err, model = %model, "interrogate model failed");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(TagSet::empty("none")),
        }
    }
}

/// Split an interrogate caption into tags. Comma-separated when there is a
/// comma, whitespace-separated otherwise; `<error>`-style markers yield nothing.
fn split_caption(caption: &str) -> Vec<String> {
    let parts: Vec<&str> = if caption.contains(',') {
        caption.split(',').collect()
    } else {
        caption.split_whitespace().collect()
    };
    let tags: Vec<String> = parts
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(clean_tag)
        .collect();
    if tags.iter().any(|t| t.starts_with('<') && t.ends_with('>')) {
        return Vec::new();
    }
    tags
}

fn clean_tag(raw: &str) -> String {
    let unescaped = raw.replace("\\(", "(").replace("\\)", ")");
    match WEIGHTED.captures(&unescaped) {
        Some(caps) if !raw.starts_with("\\(") => caps[1].trim().to_string(),
        _ => unescaped,
    }
}
