/// Read side of application users shared by the engines
use crate::{
    error::{ApiError, ApiResult, ErrorCode},
    models::{ApplicationUser, SanitizedUser, Tenant},
    store::{self, EntityKey, SecondaryNamespace, Store},
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Loads users by id or social id and hydrates feed authors
pub struct UserDirectory {
    store: Arc<dyn Store>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, tenant: Tenant, user_id: &str) -> ApiResult<Option<ApplicationUser>> {
        let key = EntityKey::User(tenant, user_id.to_string());
        Ok(store::get_json(self.store.as_ref(), &key).await?)
    }

    /// Enabled user or `UserNotFound`
    pub async fn require_active(&self, tenant: Tenant, user_id: &str) -> ApiResult<ApplicationUser> {
        self.get(tenant, user_id)
            .await?
            .filter(|user| user.enabled)
            .ok_or(ApiError::Code(ErrorCode::UserNotFound))
    }

    pub async fn put(&self, user: &ApplicationUser) -> ApiResult<()> {
        let tenant = Tenant::new(user.account_id, user.application_id);
        let key = EntityKey::User(tenant, user.id.clone());
        Ok(store::put_json(self.store.as_ref(), &key, user).await?)
    }

    /// Local id of the user registered with `external_id` on `platform`
    pub async fn by_social_id(
        &self,
        tenant: Tenant,
        platform: &str,
        external_id: &str,
    ) -> ApiResult<Option<String>> {
        let namespace = SecondaryNamespace::Social(tenant, platform.to_string());
        Ok(self.store.secondary_get(&namespace, external_id).await?)
    }

    /// Enabled users among `ids`, in the given order, each loaded once
    pub async fn load_active(&self, tenant: Tenant, ids: &[String]) -> ApiResult<Vec<ApplicationUser>> {
        let mut seen = std::collections::HashSet::new();
        let mut users = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(user) = self.get(tenant, id).await? {
                if user.enabled {
                    users.push(user);
                }
            }
        }
        Ok(users)
    }

    /// Sanitized projection of every distinct author, keyed by id
    pub async fn hydrate(&self, tenant: Tenant, ids: &[String]) -> ApiResult<BTreeMap<String, SanitizedUser>> {
        let mut users = BTreeMap::new();
        for id in ids {
            if users.contains_key(id) {
                continue;
            }
            if let Some(user) = self.get(tenant, id).await? {
                users.insert(id.clone(), user.sanitize());
            }
        }
        Ok(users)
    }
}
