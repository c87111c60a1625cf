/// Directed, typed edges between application users
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection type. Follow edges are asymmetric, friend edges are mirrored.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Follow,
    Friend,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Follow => "follow",
            ConnectionType::Friend => "friend",
        }
    }

    pub const ALL: [ConnectionType; 2] = [ConnectionType::Follow, ConnectionType::Friend];
}

impl std::str::FromStr for ConnectionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(ConnectionType::Follow),
            "friend" => Ok(ConnectionType::Friend),
            _ => Err(()),
        }
    }
}

/// Position of an edge in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Pending,
    Enabled,
    Disabled,
}

/// Directed edge `user_from_id -> user_to_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub user_from_id: String,
    pub user_to_id: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub enabled: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        user_from_id: impl Into<String>,
        user_to_id: impl Into<String>,
        connection_type: ConnectionType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_from_id: user_from_id.into(),
            user_to_id: user_to_id.into(),
            connection_type,
            enabled: false,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending and disabled edges are both `enabled == false`; a disabled
    /// edge has been confirmed at least once.
    pub fn state(&self) -> ConnectionState {
        match (self.enabled, self.confirmed_at) {
            (true, _) => ConnectionState::Enabled,
            (false, None) => ConnectionState::Pending,
            (false, Some(_)) => ConnectionState::Disabled,
        }
    }

    /// The opposite direction of a friend edge
    pub fn mirror(&self) -> Self {
        Self {
            user_from_id: self.user_to_id.clone(),
            user_to_id: self.user_from_id.clone(),
            ..self.clone()
        }
    }
}
