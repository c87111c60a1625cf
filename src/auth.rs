/// Authentication extractors
///
/// Every endpoint authenticates with HTTP Basic credentials. For application
/// scope the username is the application token and the password is the
/// application user's session token. For account scope they are the account
/// token and the account user's session token.
use crate::{
    context::AppContext,
    error::{ApiError, ApiResult, ErrorCode},
    models::{Account, AccountUser, Application, ApplicationUser, Tenant, TenantContext},
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};

/// Decoded Basic credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub session_token: String,
}

/// Read the Basic credentials of a request
pub fn basic_credentials(headers: &HeaderMap) -> ApiResult<Credentials> {
    if !headers.contains_key(AUTHORIZATION) {
        return Err(ErrorCode::AuthenticationMissing.into());
    }
    let Authorization(basic) = headers
        .typed_get::<Authorization<Basic>>()
        .ok_or(ApiError::Code(ErrorCode::AuthenticationMalformed))?;

    if basic.username().is_empty() {
        return Err(ErrorCode::AuthenticationMissing.into());
    }
    Ok(Credentials {
        token: basic.username().to_string(),
        session_token: basic.password().to_string(),
    })
}

/// Application resolved from the request, reusing the one the rate limiter
/// already looked up
async fn resolve_application(parts: &Parts, state: &AppContext, token: &str) -> ApiResult<Application> {
    if let Some(application) = parts.extensions.get::<Application>() {
        if application.auth_token == token {
            return Ok(application.clone());
        }
    }
    state.account_manager.application_by_token(token).await
}

/// Application-authenticated request with no user session (create user, login)
#[derive(Debug, Clone)]
pub struct ApplicationAuth {
    pub application: Application,
    pub tenant: Tenant,
}

#[async_trait]
impl FromRequestParts<AppContext> for ApplicationAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let credentials = basic_credentials(&parts.headers)?;
        let application = resolve_application(parts, state, &credentials.token).await?;
        Ok(ApplicationAuth {
            tenant: application.tenant(),
            application,
        })
    }
}

/// Request carrying a live application-user session
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub application: Application,
    pub user: ApplicationUser,
    pub context: TenantContext,
}

impl UserAuth {
    pub fn tenant(&self) -> Tenant {
        self.context.tenant
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let credentials = basic_credentials(&parts.headers)?;
        let application = resolve_application(parts, state, &credentials.token).await?;
        if credentials.session_token.is_empty() {
            return Err(ErrorCode::InvalidSessionToken.into());
        }

        let tenant = application.tenant();
        let user = state
            .users
            .authenticate(tenant, &credentials.session_token)
            .await?;
        tracing::debug!(%tenant, user_id = %user.id, "UserAuth: session verified");

        Ok(UserAuth {
            context: TenantContext::user(tenant, user.id.clone()),
            application,
            user,
        })
    }
}

/// Account-authenticated request with no account-user session
#[derive(Debug, Clone)]
pub struct AccountAuth {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for AccountAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let credentials = basic_credentials(&parts.headers)?;
        let account = state.account_manager.account_by_token(&credentials.token).await?;
        Ok(AccountAuth { account })
    }
}

/// Request carrying a live account-user session
#[derive(Debug, Clone)]
pub struct AccountUserAuth {
    pub account: Account,
    pub user: AccountUser,
}

#[async_trait]
impl FromRequestParts<AppContext> for AccountUserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let credentials = basic_credentials(&parts.headers)?;
        let account = state.account_manager.account_by_token(&credentials.token).await?;
        if credentials.session_token.is_empty() {
            return Err(ErrorCode::InvalidSessionToken.into());
        }
        let user = state
            .account_manager
            .verify_user(account.id, &credentials.session_token)
            .await?;
        Ok(AccountUserAuth { account, user })
    }
}
