/// Application users: registration, sessions, profile and search
use crate::{
    api::response::{created, list, no_content, ok, JsonBody, Params},
    auth::{ApplicationAuth, UserAuth},
    context::AppContext,
    error::ApiResult,
    graph::UserList,
    session::LoginRequest,
    users::{NewUser, RefreshRequest, SearchQuery, SessionView, UserUpdate},
    validation::parse_user_id,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/search", get(search_users))
        .route("/users/:id", get(get_user))
        .route("/user", get(current_user).put(update_user).delete(disable_user))
        .route("/user/login", post(login))
        .route("/user/refresh", post(refresh))
        .route("/user/logout", delete(logout))
}

#[derive(Debug, Default, Deserialize)]
struct CreateFlags {
    #[serde(rename = "withLogin", default)]
    with_login: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LoginFlags {
    #[serde(rename = "withUserDetails", default)]
    with_user_details: bool,
}

async fn create_user(
    State(ctx): State<AppContext>,
    auth: ApplicationAuth,
    Params(flags): Params<CreateFlags>,
    JsonBody(req): JsonBody<NewUser>,
) -> ApiResult<Response> {
    let user = ctx.users.create(auth.tenant, req, flags.with_login).await?;
    Ok(created(user))
}

async fn login(
    State(ctx): State<AppContext>,
    auth: ApplicationAuth,
    Params(flags): Params<LoginFlags>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Response> {
    let (user, session_token) = ctx.users.login(auth.tenant, &req).await?;
    let details = if flags.with_user_details {
        Some(ctx.users.profile(auth.tenant, None, &user).await?)
    } else {
        None
    };

    Ok(created(SessionView {
        id: user.id,
        session_token,
        user: details,
    }))
}

/// Rotate the session. The body must repeat the current token.
async fn refresh(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> ApiResult<Response> {
    let session_token = ctx
        .users
        .refresh(auth.tenant(), auth.user_id(), &req.session_token)
        .await?;
    Ok(created(SessionView {
        id: auth.user.id,
        session_token,
        user: None,
    }))
}

async fn logout(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    ctx.users.logout(auth.tenant(), auth.user_id()).await?;
    Ok(no_content())
}

async fn current_user(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let profile = ctx.users.profile(auth.tenant(), None, &auth.user).await?;
    Ok(ok(profile))
}

async fn update_user(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    JsonBody(req): JsonBody<UserUpdate>,
) -> ApiResult<Response> {
    let user = ctx.users.update(auth.tenant(), auth.user_id(), req).await?;
    let profile = ctx.users.profile(auth.tenant(), None, &user).await?;
    Ok(ok(profile))
}

async fn disable_user(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    ctx.users.disable(auth.tenant(), auth.user_id()).await?;
    Ok(no_content())
}

async fn get_user(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_user_id(&id)?;
    let profile = ctx
        .users
        .read(auth.tenant(), Some(auth.user_id()), &id)
        .await?;
    Ok(ok(profile))
}

async fn search_users(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Params(query): Params<SearchQuery>,
) -> ApiResult<Response> {
    let users = ctx
        .users
        .search(auth.tenant(), auth.user_id(), &query.q)
        .await?;
    Ok(list(users.is_empty(), UserList::from(users)))
}
