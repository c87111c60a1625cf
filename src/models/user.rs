/// Application users and their sessions
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// End-user scoped to one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationUser {
    /// Version-5 UUID, rendered hyphenated
    pub id: String,
    pub account_id: i64,
    pub application_id: i64,
    pub custom_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub social_ids: BTreeMap<String, String>,
    pub enabled: bool,
    pub activated: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationUser {
    pub fn sanitize(&self) -> SanitizedUser {
        SanitizedUser {
            id: self.id.clone(),
            custom_id: self.custom_id.clone(),
            user_name: self.user_name.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            url: self.url.clone(),
            metadata: self.metadata.clone(),
            social_ids: self.social_ids.clone(),
            activated: self.activated,
            friend_count: None,
            follower_count: None,
            followed_count: None,
            relation: None,
        }
    }

    /// Case-insensitive substring match used by user search
    pub fn matches(&self, needle: &str) -> bool {
        [
            self.user_name.as_deref(),
            self.email.as_deref(),
            self.first_name.as_deref(),
            self.last_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Outward projection of a user: no password hash, tokens or admin timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub social_ids: BTreeMap<String, String>,
    pub activated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follower_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

/// How the viewing user relates to another user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub is_friend: bool,
    pub is_follower: bool,
    pub is_followed: bool,
}

/// Live session of an application user or account user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Hex SHA-256 of the token; the token itself is never stored
    pub token_digest: String,
    pub created_at: DateTime<Utc>,
}
