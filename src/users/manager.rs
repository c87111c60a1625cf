/// Application user manager
///
/// Emails and usernames are claimed in secondary lookups before the user
/// record is written, so two concurrent registrations cannot both win the
/// same identity. Lookups of a disabled user are kept on purpose: the
/// identity stays taken.
use super::{CreatedUser, NewUser, UserDirectory, UserUpdate};
use crate::{
    error::{ApiError, ApiResult, ErrorCode},
    graph::{ConnectionEngine, GraphIndex},
    models::{ApplicationUser, SanitizedUser, Tenant},
    session::{Identifier, LoginRequest, PasswordService, SessionManager, SessionOwner},
    store::{IdScope, IndexKey, SecondaryNamespace, Store},
    validation::{is_email, length_between, lookup_key, FieldReport},
};
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Most hits returned by user search
const SEARCH_LIMIT: usize = 50;

/// Shortest search query that is executed
const SEARCH_MIN_CHARS: usize = 3;

pub struct UserManager {
    store: Arc<dyn Store>,
    directory: Arc<UserDirectory>,
    graph: Arc<GraphIndex>,
    connections: Arc<ConnectionEngine>,
    sessions: Arc<SessionManager>,
    passwords: PasswordService,
    clock: Arc<dyn Clock>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn check_metadata(report: &mut FieldReport, metadata: &Option<serde_json::Value>) {
    if let Some(metadata) = metadata {
        if !metadata.is_object() {
            report.push(ApiError::detailed(
                ErrorCode::InvalidParameter,
                "metadata must be a JSON object",
            ));
        }
    }
}

fn check_social_ids(report: &mut FieldReport, social_ids: &BTreeMap<String, String>) {
    let valid = social_ids
        .iter()
        .all(|(platform, id)| !platform.trim().is_empty() && !id.trim().is_empty());
    report.require(valid, ErrorCode::SocialIdInvalid);
}

impl UserManager {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<UserDirectory>,
        graph: Arc<GraphIndex>,
        connections: Arc<ConnectionEngine>,
        sessions: Arc<SessionManager>,
        passwords: PasswordService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            graph,
            connections,
            sessions,
            passwords,
            clock,
        }
    }

    /// Derive the stable id of the `sequence`-th user of an application
    fn user_id(tenant: Tenant, sequence: i64) -> String {
        let name = format!("{}:{}:{}", tenant.account_id, tenant.application_id, sequence);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
            .hyphenated()
            .to_string()
    }

    /// Claim `value` for `user_id`. Returns false when another user holds it.
    async fn claim(&self, namespace: &SecondaryNamespace, value: &str, user_id: &str) -> ApiResult<bool> {
        if self
            .store
            .secondary_put_if_absent(namespace, value, user_id)
            .await?
        {
            return Ok(true);
        }
        let holder = self.store.secondary_get(namespace, value).await?;
        Ok(holder.as_deref() == Some(user_id))
    }

    /// Register a user, index its social ids and connect it to the friends
    /// it already has on those platforms
    pub async fn create(&self, tenant: Tenant, request: NewUser, with_login: bool) -> ApiResult<CreatedUser> {
        let user_name = non_empty(request.user_name);
        let email = non_empty(request.email);

        let mut report = FieldReport::new();
        report.require(user_name.is_some() || email.is_some(), ErrorCode::UserIdentityMissing);
        if let Some(user_name) = &user_name {
            report.require(length_between(user_name, 2, 40), ErrorCode::UserNameLength);
        }
        if let Some(email) = &email {
            report.require(is_email(email), ErrorCode::InvalidEmail);
        }
        report.require(length_between(&request.password, 4, 60), ErrorCode::PasswordLength);
        check_metadata(&mut report, &request.metadata);
        check_social_ids(&mut report, &request.social_ids);
        report.require(
            request
                .social_connection_ids
                .keys()
                .all(|platform| !platform.trim().is_empty()),
            ErrorCode::SocialIdInvalid,
        );
        report.finish()?;

        let sequence = self.store.generate_id(IdScope::AppUser(tenant)).await?;
        let id = Self::user_id(tenant, sequence);

        let email_namespace = SecondaryNamespace::UserEmail(tenant);
        if let Some(email) = &email {
            if !self.claim(&email_namespace, &lookup_key(email), &id).await? {
                return Err(ErrorCode::EmailInUse.into());
            }
        }
        if let Some(user_name) = &user_name {
            let namespace = SecondaryNamespace::UserName(tenant);
            if !self.claim(&namespace, &lookup_key(user_name), &id).await? {
                if let Some(email) = &email {
                    self.store
                        .secondary_delete(&email_namespace, &lookup_key(email))
                        .await?;
                }
                return Err(ErrorCode::UserNameInUse.into());
            }
        }

        let now = self.clock.utc();
        let user = ApplicationUser {
            id: id.clone(),
            account_id: tenant.account_id,
            application_id: tenant.application_id,
            custom_id: non_empty(request.custom_id),
            user_name,
            email,
            password_hash: self.passwords.hash(&request.password)?,
            first_name: request.first_name,
            last_name: request.last_name,
            url: request.url,
            metadata: request.metadata,
            social_ids: request.social_ids,
            enabled: true,
            activated: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        self.directory.put(&user).await?;
        self.store.set_add(&IndexKey::Users(tenant), &id).await?;
        for (platform, external_id) in &user.social_ids {
            self.store
                .secondary_put(&SecondaryNamespace::Social(tenant, platform.clone()), external_id, &id)
                .await?;
        }

        let connection_type = request.connection_type.unwrap_or_default();
        let mut connections = Vec::new();
        for (platform, external_ids) in &request.social_connection_ids {
            let connected = self
                .connections
                .social_connect(tenant, &id, platform, external_ids, connection_type)
                .await?;
            connections.extend(connected.iter().map(ApplicationUser::sanitize));
        }

        let session_token = if with_login {
            Some(
                self.sessions
                    .create_session(&SessionOwner::User(tenant, id.clone()))
                    .await?,
            )
        } else {
            None
        };

        info!(%tenant, user_id = %id, connections = connections.len(), "create_user: user created");
        Ok(CreatedUser {
            user: user.sanitize(),
            session_token,
            connections,
        })
    }

    /// Resolve a login to an enabled user and start a session.
    /// Unknown and disabled users are indistinguishable to the caller.
    pub async fn login(&self, tenant: Tenant, request: &LoginRequest) -> ApiResult<(ApplicationUser, String)> {
        let identifiers = request.identifiers();
        if identifiers.is_empty() {
            return Err(ErrorCode::UserIdentityMissing.into());
        }

        let mut found = None;
        for identifier in identifiers {
            let (namespace, key) = match identifier {
                Identifier::Email(key) => (SecondaryNamespace::UserEmail(tenant), key),
                Identifier::UserName(key) => (SecondaryNamespace::UserName(tenant), key),
            };
            if let Some(id) = self.store.secondary_get(&namespace, &key).await? {
                found = Some(id);
                break;
            }
        }
        let user_id = found.ok_or(ApiError::Code(ErrorCode::UserNotFound))?;
        let mut user = self.directory.require_active(tenant, &user_id).await?;

        if !self.passwords.verify(&request.password, &user.password_hash)? {
            warn!(%tenant, user_id = %user.id, "login: wrong password");
            return Err(ErrorCode::InvalidCredentials.into());
        }

        user.last_login = Some(self.clock.utc());
        self.directory.put(&user).await?;

        let token = self
            .sessions
            .create_session(&SessionOwner::User(tenant, user.id.clone()))
            .await?;
        info!(%tenant, user_id = %user.id, "login: user logged in");
        Ok((user, token))
    }

    /// Rotate the caller's session token
    pub async fn refresh(&self, tenant: Tenant, user_id: &str, presented: &str) -> ApiResult<String> {
        self.sessions
            .refresh_session(&SessionOwner::User(tenant, user_id.to_string()), presented)
            .await
    }

    pub async fn logout(&self, tenant: Tenant, user_id: &str) -> ApiResult<()> {
        self.sessions
            .destroy_session(&SessionOwner::User(tenant, user_id.to_string()))
            .await?;
        debug!(%tenant, user_id, "logout: user logged out");
        Ok(())
    }

    /// Resolve a session token to its user
    pub async fn authenticate(&self, tenant: Tenant, session_token: &str) -> ApiResult<ApplicationUser> {
        let user_id = self
            .sessions
            .verify_session(&SessionOwner::User(tenant, String::new()), session_token)
            .await?;

        match self.directory.get(tenant, &user_id).await? {
            Some(user) if user.enabled => Ok(user),
            Some(_) => Err(ErrorCode::UserDisabled.into()),
            None => Err(ErrorCode::InvalidSessionToken.into()),
        }
    }

    /// Sanitized user with relation counts, plus the viewer's relation to it
    pub async fn read(&self, tenant: Tenant, viewer: Option<&str>, user_id: &str) -> ApiResult<SanitizedUser> {
        let user = self.directory.require_active(tenant, user_id).await?;
        self.profile(tenant, viewer, &user).await
    }

    /// Counts and relation for an already loaded user
    pub async fn profile(
        &self,
        tenant: Tenant,
        viewer: Option<&str>,
        user: &ApplicationUser,
    ) -> ApiResult<SanitizedUser> {
        let (friends, followers, followees) = self.graph.counts(tenant, &user.id).await?;

        let mut view = user.sanitize();
        view.friend_count = Some(friends as usize);
        view.follower_count = Some(followers as usize);
        view.followed_count = Some(followees as usize);

        if let Some(viewer) = viewer.filter(|viewer| *viewer != user.id) {
            view.relation = Some(self.graph.relation(tenant, viewer, &user.id).await?);
        }
        Ok(view)
    }

    async fn reindex(
        &self,
        namespace: SecondaryNamespace,
        user_id: &str,
        old: Option<&str>,
        new: Option<&str>,
        in_use: ErrorCode,
    ) -> ApiResult<()> {
        let old_key = old.map(lookup_key);
        let new_key = new.map(lookup_key);
        if old_key == new_key {
            return Ok(());
        }

        if let Some(new_key) = &new_key {
            if !self.claim(&namespace, new_key, user_id).await? {
                return Err(in_use.into());
            }
        }
        if let Some(old_key) = &old_key {
            self.store.secondary_delete(&namespace, old_key).await?;
        }
        Ok(())
    }

    /// Apply a partial profile update
    pub async fn update(&self, tenant: Tenant, user_id: &str, update: UserUpdate) -> ApiResult<ApplicationUser> {
        let mut user = self.directory.require_active(tenant, user_id).await?;

        let user_name = match update.user_name {
            Some(value) => non_empty(Some(value)),
            None => user.user_name.clone(),
        };
        let email = match update.email {
            Some(value) => non_empty(Some(value)),
            None => user.email.clone(),
        };

        let mut report = FieldReport::new();
        report.require(user_name.is_some() || email.is_some(), ErrorCode::UserIdentityMissing);
        if let Some(user_name) = &user_name {
            report.require(length_between(user_name, 2, 40), ErrorCode::UserNameLength);
        }
        if let Some(email) = &email {
            report.require(is_email(email), ErrorCode::InvalidEmail);
        }
        if let Some(password) = &update.password {
            report.require(length_between(password, 4, 60), ErrorCode::PasswordLength);
        }
        check_metadata(&mut report, &update.metadata);
        if let Some(social_ids) = &update.social_ids {
            check_social_ids(&mut report, social_ids);
        }
        report.finish()?;

        self.reindex(
            SecondaryNamespace::UserEmail(tenant),
            user_id,
            user.email.as_deref(),
            email.as_deref(),
            ErrorCode::EmailInUse,
        )
        .await?;
        self.reindex(
            SecondaryNamespace::UserName(tenant),
            user_id,
            user.user_name.as_deref(),
            user_name.as_deref(),
            ErrorCode::UserNameInUse,
        )
        .await?;

        if let Some(social_ids) = update.social_ids {
            for (platform, external_id) in &user.social_ids {
                if social_ids.get(platform) != Some(external_id) {
                    self.store
                        .secondary_delete(&SecondaryNamespace::Social(tenant, platform.clone()), external_id)
                        .await?;
                }
            }
            for (platform, external_id) in &social_ids {
                self.store
                    .secondary_put(&SecondaryNamespace::Social(tenant, platform.clone()), external_id, user_id)
                    .await?;
            }
            user.social_ids = social_ids;
        }

        if let Some(password) = &update.password {
            user.password_hash = self.passwords.hash(password)?;
        }
        user.user_name = user_name;
        user.email = email;
        if update.custom_id.is_some() {
            user.custom_id = non_empty(update.custom_id);
        }
        if update.first_name.is_some() {
            user.first_name = update.first_name;
        }
        if update.last_name.is_some() {
            user.last_name = update.last_name;
        }
        if update.url.is_some() {
            user.url = update.url;
        }
        if update.metadata.is_some() {
            user.metadata = update.metadata;
        }
        user.updated_at = self.clock.utc();

        self.directory.put(&user).await?;
        info!(%tenant, user_id, "update_user: user updated");
        Ok(user)
    }

    /// Disable the user and end its session. Lookups stay claimed.
    pub async fn disable(&self, tenant: Tenant, user_id: &str) -> ApiResult<()> {
        let mut user = self.directory.require_active(tenant, user_id).await?;
        user.enabled = false;
        user.updated_at = self.clock.utc();
        self.directory.put(&user).await?;

        self.sessions
            .destroy_session(&SessionOwner::User(tenant, user_id.to_string()))
            .await?;
        info!(%tenant, user_id, "disable_user: user disabled");
        Ok(())
    }

    /// Case-insensitive substring search over the application's users.
    /// Queries shorter than three characters match nothing.
    pub async fn search(&self, tenant: Tenant, caller: &str, query: &str) -> ApiResult<Vec<SanitizedUser>> {
        let needle = query.trim().to_lowercase();
        if needle.chars().count() < SEARCH_MIN_CHARS {
            return Ok(Vec::new());
        }

        let mut ids = self.store.set_scan(&IndexKey::Users(tenant), None).await?;
        ids.retain(|id| id != caller);
        let users = self
            .directory
            .load_active(tenant, &ids)
            .await?;

        let mut hits: Vec<ApplicationUser> = users
            .into_iter()
            .filter(|user| user.matches(&needle))
            .collect();
        hits.sort_by(|a, b| a.user_name.cmp(&b.user_name).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(SEARCH_LIMIT);

        debug!(%tenant, hits = hits.len(), "search_users: search finished");
        Ok(hits.iter().map(ApplicationUser::sanitize).collect())
    }

    /// Record the caller's own id on a platform
    pub async fn attach_social_id(
        &self,
        tenant: Tenant,
        user_id: &str,
        platform: &str,
        external_id: &str,
    ) -> ApiResult<()> {
        if platform.trim().is_empty() || external_id.trim().is_empty() {
            return Err(ErrorCode::SocialIdInvalid.into());
        }

        let mut user = self.directory.require_active(tenant, user_id).await?;
        if user.social_ids.get(platform).map(String::as_str) == Some(external_id) {
            return Ok(());
        }

        self.store
            .secondary_put(&SecondaryNamespace::Social(tenant, platform.to_string()), external_id, user_id)
            .await?;
        user.social_ids
            .insert(platform.to_string(), external_id.to_string());
        user.updated_at = self.clock.utc();
        self.directory.put(&user).await?;

        debug!(%tenant, user_id, platform, "attach_social_id: social id recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanoutConfig;
    use crate::events::EventEngine;
    use crate::store::MemoryStore;
    use crate::test_support::MutableClock;
    use chrono::Utc;

    struct Fixture {
        graph: Arc<GraphIndex>,
        users: UserManager,
        tenant: Tenant,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MutableClock::new(Utc::now()));
        let graph = Arc::new(GraphIndex::new(store.clone()));
        let directory = Arc::new(UserDirectory::new(store.clone()));
        let events = Arc::new(EventEngine::new(
            store.clone(),
            graph.clone(),
            directory.clone(),
            clock.clone(),
            FanoutConfig {
                follower_cap: 0,
                scan_batch: 300,
            },
        ));
        let connections = Arc::new(ConnectionEngine::new(
            store.clone(),
            graph.clone(),
            directory.clone(),
            events,
            clock.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(store.clone(), clock.clone(), 32));
        let users = UserManager::new(
            store,
            directory,
            graph.clone(),
            connections,
            sessions,
            PasswordService::new(1024, 1).unwrap(),
            clock,
        );
        Fixture {
            graph,
            users,
            tenant: Tenant::new(1, 1),
        }
    }

    fn new_user(user_name: &str) -> NewUser {
        NewUser {
            user_name: Some(user_name.to_string()),
            email: Some(format!("{}@example.com", user_name)),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_validates_every_field() {
        let f = fixture();
        let error = f
            .users
            .create(
                f.tenant,
                NewUser {
                    email: Some("not-an-email".to_string()),
                    password: "abc".to_string(),
                    metadata: Some(serde_json::json!([1, 2])),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap_err();
        let codes: Vec<u16> = error.entries().iter().map(|entry| entry.code).collect();
        assert_eq!(codes, vec![4006, 4005, 1002]);

        let error = f
            .users
            .create(f.tenant, NewUser { password: "secret".into(), ..Default::default() }, false)
            .await
            .unwrap_err();
        assert!(error.is(ErrorCode::UserIdentityMissing));
    }

    #[tokio::test]
    async fn test_ids_are_stable_uuids() {
        let f = fixture();
        let created = f.users.create(f.tenant, new_user("alice"), true).await.unwrap();
        let parsed = Uuid::parse_str(&created.user.id).unwrap();
        assert_eq!(parsed.get_version_num(), 5);
        assert_eq!(created.user.id, UserManager::user_id(f.tenant, 1));
        assert!(created.session_token.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let f = fixture();
        f.users.create(f.tenant, new_user("alice"), false).await.unwrap();

        let mut duplicate = new_user("alice2");
        duplicate.email = Some("ALICE@example.com ".to_string());
        let error = f.users.create(f.tenant, duplicate, false).await.unwrap_err();
        assert!(error.is(ErrorCode::EmailInUse));

        let mut duplicate = new_user("Alice");
        duplicate.email = Some("other@example.com".to_string());
        let error = f.users.create(f.tenant, duplicate, false).await.unwrap_err();
        assert!(error.is(ErrorCode::UserNameInUse));

        // The released email can be registered again
        let mut retry = new_user("carol");
        retry.email = Some("other@example.com".to_string());
        assert!(f.users.create(f.tenant, retry, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_paths() {
        let f = fixture();
        let created = f.users.create(f.tenant, new_user("alice"), false).await.unwrap();

        let by_email_name = LoginRequest {
            email_name: Some("alice".to_string()),
            password: "secret".to_string(),
            ..Default::default()
        };
        let (user, token) = f.users.login(f.tenant, &by_email_name).await.unwrap();
        assert_eq!(user.id, created.user.id);
        assert!(user.last_login.is_some());
        assert_eq!(f.users.authenticate(f.tenant, &token).await.unwrap().id, user.id);

        let wrong = LoginRequest {
            email: Some("alice@example.com".to_string()),
            password: "nope".to_string(),
            ..Default::default()
        };
        assert!(f
            .users
            .login(f.tenant, &wrong)
            .await
            .unwrap_err()
            .is(ErrorCode::InvalidCredentials));

        f.users.disable(f.tenant, &user.id).await.unwrap();
        assert!(f
            .users
            .login(f.tenant, &by_email_name)
            .await
            .unwrap_err()
            .is(ErrorCode::UserNotFound));
        assert!(f.users.authenticate(f.tenant, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_requires_current_token() {
        let f = fixture();
        let created = f.users.create(f.tenant, new_user("alice"), true).await.unwrap();
        let token = created.session_token.unwrap();

        let rotated = f.users.refresh(f.tenant, &created.user.id, &token).await.unwrap();
        assert_ne!(rotated, token);

        let error = f
            .users
            .refresh(f.tenant, &created.user.id, &token)
            .await
            .unwrap_err();
        assert!(error.is(ErrorCode::SessionTokenMismatch));
    }

    #[tokio::test]
    async fn test_update_reindexes_email() {
        let f = fixture();
        let alice = f.users.create(f.tenant, new_user("alice"), false).await.unwrap();
        f.users.create(f.tenant, new_user("bob"), false).await.unwrap();

        let taken = UserUpdate {
            email: Some("bob@example.com".to_string()),
            ..Default::default()
        };
        let error = f.users.update(f.tenant, &alice.user.id, taken).await.unwrap_err();
        assert!(error.is(ErrorCode::EmailInUse));

        let moved = UserUpdate {
            email: Some("alice@new.example.com".to_string()),
            password: Some("fresh-secret".to_string()),
            ..Default::default()
        };
        f.users.update(f.tenant, &alice.user.id, moved).await.unwrap();

        let login = LoginRequest {
            email: Some("alice@new.example.com".to_string()),
            password: "fresh-secret".to_string(),
            ..Default::default()
        };
        assert!(f.users.login(f.tenant, &login).await.is_ok());

        let old = LoginRequest {
            email: Some("alice@example.com".to_string()),
            password: "fresh-secret".to_string(),
            ..Default::default()
        };
        assert!(f.users.login(f.tenant, &old).await.unwrap_err().is(ErrorCode::UserNotFound));
    }

    #[tokio::test]
    async fn test_search() {
        let f = fixture();
        let alice = f.users.create(f.tenant, new_user("alice"), false).await.unwrap();
        f.users.create(f.tenant, new_user("alicia"), false).await.unwrap();
        let bob = f.users.create(f.tenant, new_user("bob"), false).await.unwrap();

        assert!(f.users.search(f.tenant, &bob.user.id, "al").await.unwrap().is_empty());

        let hits = f.users.search(f.tenant, &bob.user.id, "ALI").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].user_name.as_deref(), Some("alice"));

        let hits = f.users.search(f.tenant, &alice.user.id, "ali").await.unwrap();
        assert_eq!(hits.len(), 1);

        f.users.disable(f.tenant, &hits[0].id).await.unwrap();
        assert!(f.users.search(f.tenant, &alice.user.id, "ali").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_social_connections_on_create() {
        let f = fixture();
        let mut friend = new_user("friend");
        friend.social_ids.insert("facebook".to_string(), "fb-1".to_string());
        let friend = f.users.create(f.tenant, friend, false).await.unwrap();

        let mut joiner = new_user("joiner");
        joiner
            .social_connection_ids
            .insert("facebook".to_string(), vec!["fb-1".to_string(), "fb-2".to_string()]);
        let joiner = f.users.create(f.tenant, joiner, false).await.unwrap();

        assert_eq!(joiner.connections.len(), 1);
        assert_eq!(joiner.connections[0].id, friend.user.id);
        assert!(f.graph.follows(f.tenant, &joiner.user.id, &friend.user.id).await.unwrap());

        let profile = f
            .users
            .read(f.tenant, Some(&joiner.user.id), &friend.user.id)
            .await
            .unwrap();
        assert_eq!(profile.follower_count, Some(1));
        let relation = profile.relation.unwrap();
        assert!(relation.is_followed && !relation.is_follower);
    }
}
