//! Delivery of scheduled items to a Telegram channel.
use async_trait::async_trait;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Recipient};
use tracing::info;

use crate::error::CollabResult;
use crate::model::MediaKind;

/// Telegram rejects media captions longer than this many characters.
pub const CAPTION_LIMIT: usize = 1024;

/// Sends one scheduled item; returns an identifier for the delivered message.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, kind: MediaKind, payload: &[u8], caption: &str) -> CollabResult<String>;
}

pub struct TelegramPublisher {
    bot: Bot,
    channel: Recipient,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, channel: &str) -> Self {
        Self {
            bot,
            channel: parse_recipient(channel),
        }
    }
}

/// Numeric ids become `ChatId`; anything else is a channel username.
pub fn parse_recipient(channel: &str) -> Recipient {
    let channel = channel.trim();
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if channel.starts_with('@') => Recipient::ChannelUsername(channel.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", channel)),
    }
}

fn file_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image | MediaKind::Gallery => "image.jpg",
        MediaKind::Video => "video.mp4",
        MediaKind::Animation => "animation.mp4",
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn send(&self, kind: MediaKind, payload: &[u8], caption: &str) -> CollabResult<String> {
        let file = InputFile::memory(payload.to_vec()).file_name(file_name(kind));
        let caption = caption.trim();
        let chat = self.channel.clone();

        let message = match kind {
            MediaKind::Image | MediaKind::Gallery => {
                let req = self.bot.send_photo(chat, file);
                if caption.is_empty() {
                    req.await?
                } else {
                    req.caption(caption.to_string()).await?
                }
            }
            MediaKind::Video => {
                let req = self.bot.send_video(chat, file);
                if caption.is_empty() {
                    req.await?
                } else {
                    req.caption(caption.to_string()).await?
                }
            }
            MediaKind::Animation => {
                let req = self.bot.send_animation(chat, file);
                if caption.is_empty() {
                    req.await?
                } else {
                    req.caption(caption.to_string()).await?
                }
            }
        };

        info!(kind = kind.as_str(), message_id = message.id.0, "delivered to telegram");
        Ok(message.id.0.to_string())
    }
}
