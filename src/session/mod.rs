/// Identity and session collaborator
///
/// Mints opaque session tokens, keeps exactly one live session per
/// (account, application, user) and verifies presented tokens. Nothing
/// outside this module looks inside a token.

mod password;

pub use password::PasswordService;

use crate::{
    error::{ApiError, ApiResult, ErrorCode},
    models::{Session, Tenant},
    store::{self, EntityKey, SecondaryNamespace, Store},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mockable::Clock;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Whose session a token belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOwner {
    AccountUser { account_id: i64, user_id: i64 },
    User(Tenant, String),
}

impl SessionOwner {
    fn entity_key(&self) -> EntityKey {
        match self {
            SessionOwner::AccountUser {
                account_id,
                user_id,
            } => EntityKey::AccountUserSession {
                account_id: *account_id,
                user_id: *user_id,
            },
            SessionOwner::User(tenant, user_id) => EntityKey::UserSession(*tenant, user_id.clone()),
        }
    }

    fn namespace(&self) -> SecondaryNamespace {
        match self {
            SessionOwner::AccountUser { account_id, .. } => {
                SecondaryNamespace::AccountUserSession(*account_id)
            }
            SessionOwner::User(tenant, _) => SecondaryNamespace::UserSession(*tenant),
        }
    }

    fn id(&self) -> String {
        match self {
            SessionOwner::AccountUser { user_id, .. } => user_id.to_string(),
            SessionOwner::User(_, user_id) => user_id.clone(),
        }
    }
}

/// Login payload shared by account users and application users
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "username")]
    pub user_name: Option<String>,
    /// Either an email or a username
    #[serde(default)]
    pub email_name: Option<String>,
    #[serde(default)]
    pub password: String,
}

/// One lookup to try while resolving a login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    UserName(String),
}

impl LoginRequest {
    /// Lookups in the order they are tried; email always wins a tie
    pub fn identifiers(&self) -> Vec<Identifier> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(crate::validation::lookup_key)
                .filter(|value| !value.is_empty())
        };

        let mut identifiers = Vec::new();
        if let Some(email) = present(&self.email) {
            identifiers.push(Identifier::Email(email));
        }
        if let Some(user_name) = present(&self.user_name) {
            identifiers.push(Identifier::UserName(user_name));
        }
        if let Some(either) = present(&self.email_name) {
            identifiers.push(Identifier::Email(either.clone()));
            identifiers.push(Identifier::UserName(either));
        }
        identifiers
    }
}

/// Hex SHA-256 of a token, the form sessions are stored under
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Short, non-reversible token fingerprint for logs
pub fn fingerprint(token: &str) -> String {
    token_digest(token)[..8].to_string()
}

/// Session service
pub struct SessionManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    token_bytes: usize,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, token_bytes: usize) -> Self {
        Self {
            store,
            clock,
            token_bytes,
        }
    }

    /// Random URL-safe token, also used for account and application auth tokens
    pub fn mint_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Start a session, replacing any previous one
    pub async fn create_session(&self, owner: &SessionOwner) -> ApiResult<String> {
        self.destroy_session(owner).await?;

        let token = self.mint_token();
        let session = Session {
            token_digest: token_digest(&token),
            created_at: self.clock.utc(),
        };

        store::put_json(self.store.as_ref(), &owner.entity_key(), &session).await?;
        self.store
            .secondary_put(&owner.namespace(), &session.token_digest, &owner.id())
            .await?;

        info!(
            "create_session: session {} started for {}",
            fingerprint(&token),
            owner.id()
        );
        Ok(token)
    }

    /// Resolve a presented token to its owner's id.
    /// A token survives only while it is the owner's current session.
    pub async fn verify_session(
        &self,
        namespace_owner: &SessionOwner,
        token: &str,
    ) -> ApiResult<String> {
        let digest = token_digest(token);
        let owner_id = self
            .store
            .secondary_get(&namespace_owner.namespace(), &digest)
            .await?
            .ok_or(ApiError::Code(ErrorCode::InvalidSessionToken))?;

        let owner = match namespace_owner {
            SessionOwner::AccountUser { account_id, .. } => SessionOwner::AccountUser {
                account_id: *account_id,
                user_id: owner_id
                    .parse()
                    .map_err(|_| ApiError::Code(ErrorCode::InvalidSessionToken))?,
            },
            SessionOwner::User(tenant, _) => SessionOwner::User(*tenant, owner_id.clone()),
        };

        let current: Option<Session> =
            store::get_json(self.store.as_ref(), &owner.entity_key()).await?;
        match current {
            Some(session) if session.token_digest == digest => Ok(owner_id),
            _ => {
                debug!("verify_session: stale token {}", fingerprint(token));
                Err(ErrorCode::InvalidSessionToken.into())
            }
        }
    }

    /// Rotate the session. The presented token must be the current one.
    pub async fn refresh_session(&self, owner: &SessionOwner, presented: &str) -> ApiResult<String> {
        let current: Option<Session> =
            store::get_json(self.store.as_ref(), &owner.entity_key()).await?;
        match current {
            Some(session) if session.token_digest == token_digest(presented) => {
                self.create_session(owner).await
            }
            _ => Err(ErrorCode::SessionTokenMismatch.into()),
        }
    }

    /// Remove the live session, if any
    pub async fn destroy_session(&self, owner: &SessionOwner) -> ApiResult<()> {
        let current: Option<Session> =
            store::get_json(self.store.as_ref(), &owner.entity_key()).await?;
        if let Some(session) = current {
            self.store
                .secondary_delete(&owner.namespace(), &session.token_digest)
                .await?;
            self.store.delete_entity(&owner.entity_key()).await?;
            debug!("destroy_session: session {} ended", &session.token_digest[..8]);
        }
        Ok(())
    }
}
