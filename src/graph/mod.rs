/// Connection engine and the social graph indexes it maintains
mod engine;
mod index;

pub use engine::ConnectionEngine;
pub use index::GraphIndex;

use crate::models::{ConnectionType, SanitizedUser};
use serde::{Deserialize, Serialize};

/// `POST /user/connections`
#[derive(Debug, Clone, Deserialize)]
pub struct NewConnection {
    pub user_to_id: String,
    #[serde(rename = "type", default)]
    pub connection_type: ConnectionType,
    /// Absent means confirm right away
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `PUT /user/connections/{to_id}`. Only `type` and `enabled` may change;
/// endpoint ids may be echoed back unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionPatch {
    #[serde(default)]
    pub user_from_id: Option<String>,
    #[serde(default)]
    pub user_to_id: Option<String>,
    #[serde(rename = "type", default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `POST /user/connections/social`
#[derive(Debug, Clone, Deserialize)]
pub struct SocialConnectRequest {
    /// Caller's own id on the platform, recorded when not yet known
    #[serde(default)]
    pub platform_user_id: Option<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub connection_ids: Vec<String>,
    #[serde(rename = "type", default)]
    pub connection_type: ConnectionType,
}

/// `{"users":[...], "users_count":N}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<SanitizedUser>,
    pub users_count: usize,
}

impl From<Vec<SanitizedUser>> for UserList {
    fn from(users: Vec<SanitizedUser>) -> Self {
        Self {
            users_count: users.len(),
            users,
        }
    }
}
