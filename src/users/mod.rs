/// Application users
///
/// Registration, login, profile updates and search for the end users of an
/// application. The engines read users through [`UserDirectory`]; every
/// write goes through [`UserManager`].
mod directory;
mod manager;

pub use directory::UserDirectory;
pub use manager::UserManager;

use crate::models::{ConnectionType, SanitizedUser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /users`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default, alias = "username")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// `{platform: external id}`
    #[serde(default)]
    pub social_ids: BTreeMap<String, String>,
    /// `{platform: [external ids of friends]}`
    #[serde(default)]
    pub social_connection_ids: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
}

/// `PUT /user`. Absent fields are left unchanged; ids and timestamps are
/// server-owned and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default, alias = "username")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub social_ids: Option<BTreeMap<String, String>>,
}

/// Response of `POST /users`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedUser {
    #[serde(flatten)]
    pub user: SanitizedUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<SanitizedUser>,
}

/// Response of the login and refresh endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub session_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SanitizedUser>,
}

/// `POST /user/refresh`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub session_token: String,
}

/// `GET /users/search?q=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}
