//! Feed autoposter: pulls media from ranked feeds, tags and captions it, and
//! schedules it for timed delivery to a Telegram channel.

pub mod caption;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod enrich;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod sources;
pub mod tagging;
pub mod tags;
pub mod telegram;
