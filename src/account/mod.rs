/// Tenancy administration
///
/// Accounts, their administrators and the applications they own. This is
/// scaffolding that lets an application be provisioned end to end; the
/// social engines only ever see the resulting `Tenant`.

mod manager;

pub use manager::AccountManager;

use crate::models::{Account, AccountUser, Application};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Administrator supplied when an account is created
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccountUser {
    #[serde(alias = "username")]
    pub user_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Account creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub user: NewAccountUser,
}

/// Application creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub in_production: bool,
}

/// Partial application update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApplicationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub in_production: Option<bool>,
}

/// Account as returned to its administrators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub token: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.public_id.clone(),
            name: account.name.clone(),
            description: account.description.clone(),
            token: account.auth_token.clone(),
            enabled: account.enabled,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Account user without credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUserView {
    pub id: String,
    pub user_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl AccountUserView {
    pub fn with_session(user: &AccountUser, session_token: Option<String>) -> Self {
        Self {
            id: user.public_id.clone(),
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            session_token,
        }
    }
}

/// Response of account creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedAccount {
    #[serde(flatten)]
    pub account: AccountView,
    pub user: AccountUserView,
}

/// Application as returned to account administrators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationView {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub token: String,
    pub enabled: bool,
    pub in_production: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Application> for ApplicationView {
    fn from(application: &Application) -> Self {
        Self {
            id: application.public_id.clone(),
            name: application.name.clone(),
            description: application.description.clone(),
            url: application.url.clone(),
            token: application.auth_token.clone(),
            enabled: application.enabled,
            in_production: application.in_production,
            created_at: application.created_at,
            updated_at: application.updated_at,
        }
    }
}
