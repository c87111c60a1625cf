/// Account-scope endpoints: accounts, account users and applications
use crate::{
    account::{
        AccountUserView, AccountView, ApplicationView, CreateAccountRequest,
        CreateApplicationRequest, CreatedAccount, UpdateApplicationRequest,
    },
    api::response::{created, list, no_content, ok, JsonBody},
    auth::{AccountAuth, AccountUserAuth},
    context::AppContext,
    error::ApiResult,
    session::LoginRequest,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get, post},
    Router,
};

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/account", get(current_account))
        .route("/account/user/login", post(login))
        .route("/account/user/logout", delete(logout))
        .route(
            "/account/applications",
            post(create_application).get(list_applications),
        )
        .route(
            "/account/applications/:id",
            get(get_application)
                .put(update_application)
                .delete(delete_application),
        )
}

/// Create an account and its first administrator
async fn create_account(
    State(ctx): State<AppContext>,
    JsonBody(req): JsonBody<CreateAccountRequest>,
) -> ApiResult<Response> {
    let (account, user, session_token) = ctx.account_manager.create_account(req).await?;
    tracing::info!(account_id = account.id, "create_account: account provisioned");

    Ok(created(CreatedAccount {
        account: AccountView::from(&account),
        user: AccountUserView::with_session(&user, Some(session_token)),
    }))
}

async fn current_account(auth: AccountUserAuth) -> ApiResult<Response> {
    Ok(ok(AccountView::from(&auth.account)))
}

/// Account-user login
async fn login(
    State(ctx): State<AppContext>,
    auth: AccountAuth,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Response> {
    let (user, session_token) = ctx.account_manager.login(&auth.account, &req).await?;
    Ok(created(AccountUserView::with_session(&user, Some(session_token))))
}

async fn logout(State(ctx): State<AppContext>, auth: AccountUserAuth) -> ApiResult<Response> {
    ctx.account_manager
        .logout(auth.account.id, auth.user.id)
        .await?;
    Ok(no_content())
}

async fn create_application(
    State(ctx): State<AppContext>,
    auth: AccountUserAuth,
    JsonBody(req): JsonBody<CreateApplicationRequest>,
) -> ApiResult<Response> {
    let application = ctx
        .account_manager
        .create_application(&auth.account, req)
        .await?;
    Ok(created(ApplicationView::from(&application)))
}

async fn list_applications(
    State(ctx): State<AppContext>,
    auth: AccountUserAuth,
) -> ApiResult<Response> {
    let applications = ctx
        .account_manager
        .list_applications(auth.account.id)
        .await?;
    let views: Vec<ApplicationView> = applications.iter().map(ApplicationView::from).collect();
    Ok(list(views.is_empty(), views))
}

async fn get_application(
    State(ctx): State<AppContext>,
    auth: AccountUserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let application = ctx
        .account_manager
        .get_application(auth.account.id, &id)
        .await?;
    Ok(ok(ApplicationView::from(&application)))
}

async fn update_application(
    State(ctx): State<AppContext>,
    auth: AccountUserAuth,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateApplicationRequest>,
) -> ApiResult<Response> {
    let application = ctx
        .account_manager
        .update_application(auth.account.id, &id, req)
        .await?;
    Ok(ok(ApplicationView::from(&application)))
}

/// Delete an application. Production applications answer 410.
async fn delete_application(
    State(ctx): State<AppContext>,
    auth: AccountUserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    ctx.account_manager
        .delete_application(auth.account.id, &id)
        .await?;
    Ok(no_content())
}
