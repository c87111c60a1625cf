/// Account manager
///
/// Accounts, account users and applications are plain JSON entities in the
/// store. Auth tokens are resolved through secondary lookups so that the
/// request boundary never scans.

use crate::{
    account::{CreateAccountRequest, CreateApplicationRequest, NewAccountUser, UpdateApplicationRequest},
    error::{ApiError, ApiResult, ErrorCode},
    models::{Account, AccountUser, Application, Tenant},
    session::{Identifier, LoginRequest, PasswordService, SessionManager, SessionOwner},
    store::{self, EntityKey, IdScope, IndexKey, SecondaryNamespace, Store},
    validation::{is_email, length_between, lookup_key, FieldReport},
};
use mockable::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Account manager service
pub struct AccountManager {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    passwords: PasswordService,
    clock: Arc<dyn Clock>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        passwords: PasswordService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sessions,
            passwords,
            clock,
        }
    }

    fn check_account_user(report: &mut FieldReport, user: &NewAccountUser) {
        report
            .require(length_between(&user.user_name, 2, 40), ErrorCode::UserNameLength)
            .require(length_between(&user.password, 4, 60), ErrorCode::PasswordLength)
            .require(is_email(&user.email), ErrorCode::InvalidEmail);
    }

    /// Create an account together with its first administrator.
    /// Returns the administrator's fresh session token.
    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
    ) -> ApiResult<(Account, AccountUser, String)> {
        let mut report = FieldReport::new();
        report.require(length_between(&request.name, 3, 40), ErrorCode::AccountNameInvalid);
        Self::check_account_user(&mut report, &request.user);
        report.finish()?;

        let now = self.clock.utc();
        let id = self.store.generate_id(IdScope::Account).await?;
        let account = Account {
            id,
            public_id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            auth_token: self.sessions.mint_token(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        store::put_json(self.store.as_ref(), &EntityKey::Account(id), &account).await?;
        self.store
            .secondary_put(&SecondaryNamespace::AccountToken, &account.auth_token, &id.to_string())
            .await?;

        let user = self.create_account_user(&account, request.user).await?;
        let session_token = self
            .sessions
            .create_session(&SessionOwner::AccountUser {
                account_id: id,
                user_id: user.id,
            })
            .await?;

        info!(account_id = id, "create_account: account created");
        Ok((account, user, session_token))
    }

    async fn create_account_user(
        &self,
        account: &Account,
        request: NewAccountUser,
    ) -> ApiResult<AccountUser> {
        let id = self
            .store
            .generate_id(IdScope::AccountUser(account.id))
            .await?;
        let id_value = id.to_string();

        // Claim the email and username before the record exists
        let email_namespace = SecondaryNamespace::AccountUserEmail(account.id);
        let email_key = lookup_key(&request.email);
        if !self
            .store
            .secondary_put_if_absent(&email_namespace, &email_key, &id_value)
            .await?
        {
            return Err(ErrorCode::AccountUserEmailInUse.into());
        }

        let name_namespace = SecondaryNamespace::AccountUserName(account.id);
        let name_key = lookup_key(&request.user_name);
        if !self
            .store
            .secondary_put_if_absent(&name_namespace, &name_key, &id_value)
            .await?
        {
            self.store.secondary_delete(&email_namespace, &email_key).await?;
            return Err(ErrorCode::AccountUserNameInUse.into());
        }

        let now = self.clock.utc();
        let user = AccountUser {
            id,
            account_id: account.id,
            public_id: Uuid::new_v4().to_string(),
            user_name: request.user_name,
            email: request.email,
            password_hash: self.passwords.hash(&request.password)?,
            first_name: request.first_name,
            last_name: request.last_name,
            enabled: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        store::put_json(
            self.store.as_ref(),
            &EntityKey::AccountUser {
                account_id: account.id,
                user_id: id,
            },
            &user,
        )
        .await?;

        Ok(user)
    }

    /// Resolve an account auth token
    pub async fn account_by_token(&self, token: &str) -> ApiResult<Account> {
        let id = self
            .store
            .secondary_get(&SecondaryNamespace::AccountToken, token)
            .await?
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or(ApiError::Code(ErrorCode::InvalidAccountToken))?;

        let account: Account = store::get_json(self.store.as_ref(), &EntityKey::Account(id))
            .await?
            .ok_or(ApiError::Code(ErrorCode::InvalidAccountToken))?;

        if !account.enabled {
            return Err(ErrorCode::AccountDisabled.into());
        }
        Ok(account)
    }

    /// Resolve an application auth token. The owning account must be enabled too.
    pub async fn application_by_token(&self, token: &str) -> ApiResult<Application> {
        let tenant = self
            .store
            .secondary_get(&SecondaryNamespace::ApplicationToken, token)
            .await?
            .as_deref()
            .and_then(parse_tenant)
            .ok_or(ApiError::Code(ErrorCode::InvalidApplicationToken))?;

        let application: Application =
            store::get_json(self.store.as_ref(), &EntityKey::Application(tenant))
                .await?
                .ok_or(ApiError::Code(ErrorCode::InvalidApplicationToken))?;

        if !application.enabled {
            return Err(ErrorCode::ApplicationDisabled.into());
        }

        let account: Option<Account> =
            store::get_json(self.store.as_ref(), &EntityKey::Account(tenant.account_id)).await?;
        match account {
            Some(account) if account.enabled => Ok(application),
            Some(_) => Err(ErrorCode::AccountDisabled.into()),
            None => Err(ErrorCode::InvalidApplicationToken.into()),
        }
    }

    /// Authenticate an account user and start a session
    pub async fn login(
        &self,
        account: &Account,
        request: &LoginRequest,
    ) -> ApiResult<(AccountUser, String)> {
        let identifiers = request.identifiers();
        if identifiers.is_empty() {
            return Err(ErrorCode::UserIdentityMissing.into());
        }

        let mut found = None;
        for identifier in identifiers {
            let (namespace, key) = match identifier {
                Identifier::Email(key) => (SecondaryNamespace::AccountUserEmail(account.id), key),
                Identifier::UserName(key) => (SecondaryNamespace::AccountUserName(account.id), key),
            };
            if let Some(id) = self.store.secondary_get(&namespace, &key).await? {
                found = id.parse::<i64>().ok();
                break;
            }
        }
        let user_id = found.ok_or(ApiError::Code(ErrorCode::AccountUserNotFound))?;

        let key = EntityKey::AccountUser {
            account_id: account.id,
            user_id,
        };
        let mut user: AccountUser = store::get_json(self.store.as_ref(), &key)
            .await?
            .filter(|user: &AccountUser| user.enabled)
            .ok_or(ApiError::Code(ErrorCode::AccountUserNotFound))?;

        if !self.passwords.verify(&request.password, &user.password_hash)? {
            warn!(account_id = account.id, user_id, "login: wrong password");
            return Err(ErrorCode::InvalidCredentials.into());
        }

        user.last_login = Some(self.clock.utc());
        store::put_json(self.store.as_ref(), &key, &user).await?;

        let token = self
            .sessions
            .create_session(&SessionOwner::AccountUser {
                account_id: account.id,
                user_id,
            })
            .await?;

        info!(account_id = account.id, user_id, "login: account user logged in");
        Ok((user, token))
    }

    /// Resolve an account-user session token
    pub async fn verify_user(&self, account_id: i64, session_token: &str) -> ApiResult<AccountUser> {
        let id = self
            .sessions
            .verify_session(
                &SessionOwner::AccountUser {
                    account_id,
                    user_id: 0,
                },
                session_token,
            )
            .await?;
        let user_id: i64 = id
            .parse()
            .map_err(|_| ApiError::Code(ErrorCode::InvalidSessionToken))?;

        store::get_json(
            self.store.as_ref(),
            &EntityKey::AccountUser {
                account_id,
                user_id,
            },
        )
        .await?
        .filter(|user: &AccountUser| user.enabled)
        .ok_or(ApiError::Code(ErrorCode::InvalidSessionToken))
    }

    /// End an account user's session
    pub async fn logout(&self, account_id: i64, user_id: i64) -> ApiResult<()> {
        self.sessions
            .destroy_session(&SessionOwner::AccountUser {
                account_id,
                user_id,
            })
            .await?;
        debug!(account_id, user_id, "logout: account user logged out");
        Ok(())
    }

    /// Create an application under `account`
    pub async fn create_application(
        &self,
        account: &Account,
        request: CreateApplicationRequest,
    ) -> ApiResult<Application> {
        if !length_between(&request.name, 2, 40) {
            return Err(ErrorCode::ApplicationNameInvalid.into());
        }

        let now = self.clock.utc();
        let id = self
            .store
            .generate_id(IdScope::Application(account.id))
            .await?;
        let application = Application {
            id,
            account_id: account.id,
            public_id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            url: request.url,
            auth_token: self.sessions.mint_token(),
            enabled: true,
            in_production: request.in_production,
            created_at: now,
            updated_at: now,
        };
        let tenant = application.tenant();

        store::put_json(self.store.as_ref(), &EntityKey::Application(tenant), &application).await?;
        self.store
            .secondary_put(
                &SecondaryNamespace::ApplicationToken,
                &application.auth_token,
                &format!("{}:{}", tenant.account_id, tenant.application_id),
            )
            .await?;
        self.store
            .set_add(&IndexKey::Applications(account.id), &id.to_string())
            .await?;

        info!(account_id = account.id, application_id = id, "create_application: application created");
        Ok(application)
    }

    /// All applications of an account, oldest first
    pub async fn list_applications(&self, account_id: i64) -> ApiResult<Vec<Application>> {
        let ids = self
            .store
            .set_scan(&IndexKey::Applications(account_id), None)
            .await?;

        let mut applications = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(application_id) = id.parse::<i64>() else {
                warn!(account_id, member = %id, "list_applications: malformed application id");
                continue;
            };
            let key = EntityKey::Application(Tenant::new(account_id, application_id));
            if let Some(application) = store::get_json::<Application>(self.store.as_ref(), &key).await? {
                applications.push(application);
            }
        }

        applications.sort_by_key(|application| application.id);
        Ok(applications)
    }

    /// Look an application up by its public id
    pub async fn get_application(&self, account_id: i64, public_id: &str) -> ApiResult<Application> {
        self.list_applications(account_id)
            .await?
            .into_iter()
            .find(|application| application.public_id == public_id)
            .ok_or(ApiError::Code(ErrorCode::ApplicationNotFound))
    }

    pub async fn update_application(
        &self,
        account_id: i64,
        public_id: &str,
        request: UpdateApplicationRequest,
    ) -> ApiResult<Application> {
        let mut application = self.get_application(account_id, public_id).await?;

        if let Some(name) = request.name {
            if !length_between(&name, 2, 40) {
                return Err(ErrorCode::ApplicationNameInvalid.into());
            }
            application.name = name;
        }
        if let Some(description) = request.description {
            application.description = description;
        }
        if let Some(url) = request.url {
            application.url = Some(url);
        }
        if let Some(enabled) = request.enabled {
            application.enabled = enabled;
        }
        if let Some(in_production) = request.in_production {
            application.in_production = in_production;
        }
        application.updated_at = self.clock.utc();

        store::put_json(
            self.store.as_ref(),
            &EntityKey::Application(application.tenant()),
            &application,
        )
        .await?;
        Ok(application)
    }

    /// Delete an application. Production applications are locked.
    pub async fn delete_application(&self, account_id: i64, public_id: &str) -> ApiResult<()> {
        let application = self.get_application(account_id, public_id).await?;
        if application.in_production {
            return Err(ErrorCode::ApplicationInProduction.into());
        }

        self.store
            .secondary_delete(&SecondaryNamespace::ApplicationToken, &application.auth_token)
            .await?;
        self.store
            .set_remove(&IndexKey::Applications(account_id), &application.id.to_string())
            .await?;
        self.store
            .delete_entity(&EntityKey::Application(application.tenant()))
            .await?;

        info!(account_id, application_id = application.id, "delete_application: application deleted");
        Ok(())
    }
}

fn parse_tenant(value: &str) -> Option<Tenant> {
    let (account_id, application_id) = value.split_once(':')?;
    Some(Tenant::new(account_id.parse().ok()?, application_id.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mockable::DefaultClock;

    fn manager() -> AccountManager {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let sessions = Arc::new(SessionManager::new(store.clone(), clock.clone(), 32));
        AccountManager::new(store, sessions, PasswordService::new(1024, 1).unwrap(), clock)
    }

    fn account_request() -> CreateAccountRequest {
        CreateAccountRequest {
            name: "Acme".to_string(),
            description: "rockets".to_string(),
            user: NewAccountUser {
                user_name: "wile".to_string(),
                email: "wile@acme.test".to_string(),
                password: "coyote".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_account_and_resolve_token() {
        let accounts = manager();
        let (account, user, session) = accounts.create_account(account_request()).await.unwrap();

        let resolved = accounts.account_by_token(&account.auth_token).await.unwrap();
        assert_eq!(resolved.id, account.id);
        assert_eq!(accounts.verify_user(account.id, &session).await.unwrap().id, user.id);
        assert!(accounts.account_by_token("nope").await.unwrap_err().is(ErrorCode::InvalidAccountToken));
    }

    #[tokio::test]
    async fn test_create_account_reports_every_field() {
        let mut request = account_request();
        request.name = "A".to_string();
        request.user.password = "x".to_string();
        let error = manager().create_account(request).await.unwrap_err();
        assert_eq!(error.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_login_by_email_name() {
        let accounts = manager();
        let (account, user, first) = accounts.create_account(account_request()).await.unwrap();

        let request = LoginRequest {
            email_name: Some("WILE".to_string()),
            password: "coyote".to_string(),
            ..Default::default()
        };
        let (logged_in, second) = accounts.login(&account, &request).await.unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login.is_some());
        assert!(accounts.verify_user(account.id, &first).await.is_err());
        assert!(accounts.verify_user(account.id, &second).await.is_ok());

        let wrong = LoginRequest {
            password: "roadrunner".to_string(),
            ..request
        };
        assert!(accounts.login(&account, &wrong).await.unwrap_err().is(ErrorCode::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_application_lifecycle() {
        let accounts = manager();
        let (account, _, _) = accounts.create_account(account_request()).await.unwrap();

        let application = accounts
            .create_application(
                &account,
                CreateApplicationRequest {
                    name: "feedly".to_string(),
                    in_production: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolved = accounts.application_by_token(&application.auth_token).await.unwrap();
        assert_eq!(resolved.tenant(), application.tenant());

        let error = accounts
            .delete_application(account.id, &application.public_id)
            .await
            .unwrap_err();
        assert!(error.is(ErrorCode::ApplicationInProduction));

        accounts
            .update_application(
                account.id,
                &application.public_id,
                UpdateApplicationRequest {
                    in_production: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        accounts
            .delete_application(account.id, &application.public_id)
            .await
            .unwrap();

        assert!(accounts.list_applications(account.id).await.unwrap().is_empty());
        assert!(accounts.application_by_token(&application.auth_token).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_application_fails_auth() {
        let accounts = manager();
        let (account, _, _) = accounts.create_account(account_request()).await.unwrap();
        let application = accounts
            .create_application(
                &account,
                CreateApplicationRequest {
                    name: "feedly".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        accounts
            .update_application(
                account.id,
                &application.public_id,
                UpdateApplicationRequest {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let error = accounts.application_by_token(&application.auth_token).await.unwrap_err();
        assert!(error.is(ErrorCode::ApplicationDisabled));
    }
}
