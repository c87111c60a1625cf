/// Activity events and the references stored in feeds and indexes
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may see an event. Ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Connections,
    Public,
}

impl Visibility {
    /// Private events never leave the author's own list.
    pub fn fans_out(&self) -> bool {
        !matches!(self, Visibility::Private)
    }
}

/// Object or target an event refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub display_names: std::collections::BTreeMap<String, String>,
}

/// A timestamped activity authored by one application user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub verb: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<EventObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<EventObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Coordinates are indexed only when present and not the (0, 0) placeholder.
    pub fn geo(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn reference(&self) -> EventRef {
        EventRef {
            author: self.user_id.clone(),
            id: self.id,
        }
    }

    /// Feed and time-index score
    pub fn score(&self) -> f64 {
        self.created_at.timestamp() as f64
    }
}

/// Member value written into feeds and secondary event indexes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventRef {
    pub author: String,
    pub id: i64,
}

impl EventRef {
    pub fn new(author: impl Into<String>, id: i64) -> Self {
        Self {
            author: author.into(),
            id,
        }
    }

    pub fn to_member(&self) -> String {
        format!("{}:{}", self.author, self.id)
    }

    /// User ids never contain ':', so the last segment is always the event id.
    pub fn parse_member(member: &str) -> Option<Self> {
        let (author, id) = member.rsplit_once(':')?;
        if author.is_empty() {
            return None;
        }
        Some(Self {
            author: author.to_string(),
            id: id.parse().ok()?,
        })
    }
}
