/// Account, account user and application records
use super::Tenant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub public_id: String,
    pub name: String,
    pub description: String,
    pub auth_token: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Administrator of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUser {
    pub id: i64,
    pub account_id: i64,
    pub public_id: String,
    pub user_name: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub enabled: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A product owned by exactly one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub account_id: i64,
    pub public_id: String,
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub auth_token: String,
    pub enabled: bool,
    pub in_production: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn tenant(&self) -> Tenant {
        Tenant::new(self.account_id, self.id)
    }
}
