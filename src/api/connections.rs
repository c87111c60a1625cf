/// Connection endpoints and connected-user lists
use crate::{
    api::response::{created, list, no_content, ok, JsonBody, Params},
    auth::UserAuth,
    context::AppContext,
    error::{ApiError, ApiResult, ErrorCode},
    graph::{ConnectionPatch, NewConnection, SocialConnectRequest, UserList},
    models::{ApplicationUser, ConnectionType, Tenant},
    validation::parse_user_id,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

/// Build connection routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/user/connections", post(create_connection))
        .route("/user/connections/social", post(social_connect))
        .route(
            "/user/connections/:to_id",
            put(update_connection).delete(delete_connection),
        )
        .route("/user/connections/:to_id/confirm", post(confirm_connection))
        .route("/user/follows", get(own_followees))
        .route("/user/followers", get(own_followers))
        .route("/user/friends", get(own_friends))
        .route("/users/:id/follows", get(user_followees))
        .route("/users/:id/followers", get(user_followers))
        .route("/users/:id/friends", get(user_friends))
}

/// Optional `?type=` narrowing a path-addressed edge
#[derive(Debug, Default, Deserialize)]
struct TypeFilter {
    #[serde(rename = "type", default)]
    connection_type: Option<String>,
}

impl TypeFilter {
    fn parse(&self) -> ApiResult<Option<ConnectionType>> {
        self.connection_type
            .as_deref()
            .map(|raw| {
                raw.parse::<ConnectionType>().map_err(|_| {
                    ApiError::detailed(ErrorCode::InvalidParameter, "unknown connection type")
                })
            })
            .transpose()
    }
}

/// Edge types to act on: the requested one, or every type present
async fn edge_types(
    ctx: &AppContext,
    tenant: Tenant,
    from: &str,
    to: &str,
    filter: &TypeFilter,
) -> ApiResult<Vec<ConnectionType>> {
    if let Some(connection_type) = filter.parse()? {
        return Ok(vec![connection_type]);
    }
    let types = ctx.connections.types_between(tenant, from, to).await?;
    if types.is_empty() {
        return Err(ErrorCode::ConnectionNotFound.into());
    }
    Ok(types)
}

fn user_list(users: Vec<ApplicationUser>) -> Response {
    let users: Vec<_> = users.iter().map(ApplicationUser::sanitize).collect();
    list(users.is_empty(), UserList::from(users))
}

async fn create_connection(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    JsonBody(req): JsonBody<NewConnection>,
) -> ApiResult<Response> {
    let to = parse_user_id(&req.user_to_id)?;
    let connection = ctx
        .connections
        .create(auth.tenant(), auth.user_id(), &to, req.connection_type, req.enabled)
        .await?;
    Ok(created(connection))
}

async fn confirm_connection(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(to_id): Path<String>,
    Params(filter): Params<TypeFilter>,
) -> ApiResult<Response> {
    let to = parse_user_id(&to_id)?;
    let tenant = auth.tenant();

    let mut confirmed = Vec::new();
    for connection_type in edge_types(&ctx, tenant, auth.user_id(), &to, &filter).await? {
        confirmed.push(
            ctx.connections
                .confirm(tenant, auth.user_id(), &to, connection_type)
                .await?,
        );
    }
    Ok(created(confirmed.remove(0)))
}

async fn update_connection(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(to_id): Path<String>,
    Params(filter): Params<TypeFilter>,
    JsonBody(patch): JsonBody<ConnectionPatch>,
) -> ApiResult<Response> {
    let to = parse_user_id(&to_id)?;
    let tenant = auth.tenant();

    // Without `?type=` the body's type names the edge only when it exists
    let types = edge_types(&ctx, tenant, auth.user_id(), &to, &filter).await?;
    let current = match patch.connection_type {
        Some(wanted) if filter.connection_type.is_none() && types.contains(&wanted) => wanted,
        _ => types[0],
    };

    let connection = ctx
        .connections
        .update(tenant, auth.user_id(), &to, current, patch)
        .await?;
    Ok(ok(connection))
}

async fn delete_connection(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(to_id): Path<String>,
    Params(filter): Params<TypeFilter>,
) -> ApiResult<Response> {
    let to = parse_user_id(&to_id)?;
    let tenant = auth.tenant();

    for connection_type in edge_types(&ctx, tenant, auth.user_id(), &to, &filter).await? {
        ctx.connections
            .delete(tenant, auth.user_id(), &to, connection_type)
            .await?;
    }
    Ok(no_content())
}

/// Connect the caller to its friends on an external platform
async fn social_connect(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    JsonBody(req): JsonBody<SocialConnectRequest>,
) -> ApiResult<Response> {
    let tenant = auth.tenant();
    if let Some(own_id) = req.platform_user_id.as_deref().filter(|id| !id.is_empty()) {
        ctx.users
            .attach_social_id(tenant, auth.user_id(), &req.platform, own_id)
            .await?;
    }

    let users = ctx
        .connections
        .social_connect(
            tenant,
            auth.user_id(),
            &req.platform,
            &req.connection_ids,
            req.connection_type,
        )
        .await?;

    let users: Vec<_> = users.iter().map(ApplicationUser::sanitize).collect();
    if users.is_empty() {
        return Ok(no_content());
    }
    Ok(created(UserList::from(users)))
}

async fn own_followees(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let users = ctx.connections.followees(auth.tenant(), auth.user_id()).await?;
    Ok(user_list(users))
}

async fn own_followers(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let users = ctx.connections.followers(auth.tenant(), auth.user_id()).await?;
    Ok(user_list(users))
}

async fn own_friends(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let users = ctx.connections.friends(auth.tenant(), auth.user_id()).await?;
    Ok(user_list(users))
}

/// Resolve a path user id to an active user of the caller's application
async fn path_user(ctx: &AppContext, tenant: Tenant, raw: &str) -> ApiResult<String> {
    let id = parse_user_id(raw)?;
    ctx.directory.require_active(tenant, &id).await?;
    Ok(id)
}

async fn user_followees(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = path_user(&ctx, auth.tenant(), &id).await?;
    Ok(user_list(ctx.connections.followees(auth.tenant(), &id).await?))
}

async fn user_followers(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = path_user(&ctx, auth.tenant(), &id).await?;
    Ok(user_list(ctx.connections.followers(auth.tenant(), &id).await?))
}

async fn user_friends(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = path_user(&ctx, auth.tenant(), &id).await?;
    Ok(user_list(ctx.connections.friends(auth.tenant(), &id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_filter() {
        let filter = TypeFilter {
            connection_type: Some("friend".to_string()),
        };
        assert_eq!(filter.parse().unwrap(), Some(ConnectionType::Friend));
        assert_eq!(TypeFilter::default().parse().unwrap(), None);

        let filter = TypeFilter {
            connection_type: Some("block".to_string()),
        };
        assert!(filter.parse().unwrap_err().is(ErrorCode::InvalidParameter));
    }
}
