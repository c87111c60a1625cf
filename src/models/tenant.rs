/// Tenant scoping for every engine call
use serde::{Deserialize, Serialize};

/// The (account, application) pair that scopes every key in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    pub account_id: i64,
    pub application_id: i64,
}

impl Tenant {
    pub fn new(account_id: i64, application_id: i64) -> Self {
        Self {
            account_id,
            application_id,
        }
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_id, self.application_id)
    }
}

/// Request-scoped bag resolved from the caller's credentials
///
/// `user_id` is absent for endpoints that only authenticate the application
/// (user creation, login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub user_id: Option<String>,
}

impl TenantContext {
    pub fn application(tenant: Tenant) -> Self {
        Self {
            tenant,
            user_id: None,
        }
    }

    pub fn user(tenant: Tenant, user_id: impl Into<String>) -> Self {
        Self {
            tenant,
            user_id: Some(user_id.into()),
        }
    }
}
