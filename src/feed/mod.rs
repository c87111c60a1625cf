/// Feed engine: materialized news feeds and the unread cursor
mod engine;

pub use engine::FeedEngine;

use crate::models::{Event, SanitizedUser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{"events":[...], "unread_events_count":N, "users":{id: user}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub events: Vec<Event>,
    pub unread_events_count: u64,
    pub users: BTreeMap<String, SanitizedUser>,
}

impl FeedPage {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// `{"unread_events_count":N}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    pub unread_events_count: u64,
}
