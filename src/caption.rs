//! Caption generation through an OpenAI-compatible chat completions server
//! (LM Studio or similar).
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Caption as CaptionConfig;
use crate::error::{ensure_success, CollabResult, CollaboratorError};

/// Result of one caption request. A rejected caption is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionOutcome {
    pub text: String,
    pub accepted: bool,
    pub rejection_reason: Option<String>,
}

impl CaptionOutcome {
    pub fn accepted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            accepted: true,
            rejection_reason: None,
        }
    }

    pub fn rejected(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            accepted: false,
            rejection_reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Captioner: Send + Sync {
    /// `negative_examples` are recently rejected captions the model should
    /// not imitate.
    async fn caption(
        &self,
        tags: &[String],
        negative_examples: &[String],
    ) -> CollabResult<CaptionOutcome>;
}

pub struct ChatCaptioner {
    http: Client,
    base_url: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_tokens: u32,
    min_chars: usize,
    disallowed_terms: Vec<String>,
}

impl ChatCaptioner {
    pub fn from_config(cfg: &CaptionConfig) -> CollabResult<Self> {
        let http = Client::builder()
            .user_agent("tg-autoposter/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            system_prompt: cfg.system_prompt.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            min_chars: cfg.min_chars,
            disallowed_terms: cfg
                .disallowed_terms
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.trim().is_empty())
                .collect(),
        })
    }

    fn build_request(&self, tags: &[String], negative_examples: &[String]) -> ChatRequest {
        let mut user = format!(
            "Write a short, vivid description of the image based on these tags.\nTags: {}\n",
            tags.join(", ")
        );
        if !negative_examples.is_empty() {
            user.push_str("\nDo not write like these rejected examples:\n");
            for example in negative_examples {
                user.push_str("- ");
                user.push_str(example);
                user.push('\n');
            }
        }
        user.push_str("\nDescription:");

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Content rules applied to every completion.
    fn review(&self, text: &str) -> Result<(), String> {
        if text.chars().count() < self.min_chars {
            return Err("too short".into());
        }
        let lower = text.to_lowercase();
        if let Some(term) = self.disallowed_terms.iter().find(|t| lower.contains(t.as_str())) {
            return Err(format!("disallowed term: {}", term));
        }
        Ok(())
    }
}

#[async_trait]
impl Captioner for ChatCaptioner {
    async fn caption(
        &self,
        tags: &[String],
        negative_examples: &[String],
    ) -> CollabResult<CaptionOutcome> {
        let request = self.build_request(tags, negative_examples);
        let res = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await?;
        let body: ChatResponse = ensure_success(res).await?.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| CollaboratorError::Parse("completion has no choices".into()))?;
        debug!(chars = text.chars().count(), "caption completion received");

        Ok(match self.review(&text) {
            Ok(()) => CaptionOutcome::accepted(text),
            Err(reason) => CaptionOutcome::rejected(text, reason),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captioner() -> ChatCaptioner {
        let cfg: crate::config::Config =
            serde_yaml::from_str(crate::config::example()).unwrap();
        ChatCaptioner::from_config(&cfg.caption).unwrap()
    }

    #[test]
    fn review_rejects_short_and_disallowed() {
        let c = captioner();
        assert_eq!(c.review("tiny"), Err("too short".to_string()));
        assert_eq!(
            c.review("As an AI I would rather not describe this picture."),
            Err("disallowed term: as an ai".to_string())
        );
        assert!(c.review("A fox naps under cherry blossoms at dusk.").is_ok());
    }

    #[test]
    fn request_lists_tags_and_negative_examples() {
        let c = captioner();
        let req = c.build_request(
            &["fox".to_string(), "cherry_blossoms".to_string()],
            &["bad one".to_string()],
        );
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["model"], "saiga_nemo_12b_gguf");
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Tags: fox, cherry_blossoms"));
        assert!(user.contains("- bad one"));
        assert_eq!(body["max_tokens"], 150);
    }

    #[test]
    fn request_without_negatives_has_no_example_block() {
        let c = captioner();
        let req = c.build_request(&["fox".to_string()], &[]);
        assert!(!req.messages[1].content.contains("rejected examples"));
    }
}
