/// Event endpoints: own events, other users' events and search
use crate::{
    api::response::{created, list, no_content, ok, JsonBody, Params},
    auth::UserAuth,
    context::AppContext,
    error::{ApiError, ApiResult, ErrorCode},
    events::{EventBody, EventList, SearchParams},
    validation::parse_user_id,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};

/// Build event routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/user/events", get(own_events).post(create_event))
        .route(
            "/user/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/users/:id/events", get(user_events))
        .route("/events", get(search_events))
}

fn event_id(raw: &str) -> ApiResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::detailed(ErrorCode::InvalidParameter, "event id must be numeric"))
}

async fn create_event(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    JsonBody(body): JsonBody<EventBody>,
) -> ApiResult<Response> {
    let event = ctx.events.create(auth.tenant(), auth.user_id(), body).await?;
    Ok(created(event))
}

async fn own_events(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let events = ctx
        .events
        .list_by_author(auth.tenant(), auth.user_id(), auth.user_id())
        .await?;
    Ok(list(events.is_empty(), EventList::from(events)))
}

async fn get_event(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let event = ctx
        .events
        .read(auth.tenant(), auth.user_id(), event_id(&id)?)
        .await?;
    Ok(ok(event))
}

/// Only `enabled` may change; every other field must echo the stored value
async fn update_event(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<EventBody>,
) -> ApiResult<Response> {
    let event = ctx
        .events
        .update(auth.tenant(), auth.user_id(), event_id(&id)?, body)
        .await?;
    Ok(ok(event))
}

async fn delete_event(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    ctx.events
        .delete(auth.tenant(), auth.user_id(), event_id(&id)?)
        .await?;
    Ok(no_content())
}

/// Events of another user as the caller may see them
async fn user_events(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let author = parse_user_id(&id)?;
    ctx.directory.require_active(auth.tenant(), &author).await?;

    let events = ctx
        .events
        .list_by_author(auth.tenant(), &author, auth.user_id())
        .await?;
    Ok(list(events.is_empty(), EventList::from(events)))
}

async fn search_events(
    State(ctx): State<AppContext>,
    auth: UserAuth,
    Params(params): Params<SearchParams>,
) -> ApiResult<Response> {
    let query = params.into_query()?;
    let events = ctx.events.search(auth.tenant(), auth.user_id(), query).await?;
    Ok(list(events.is_empty(), EventList::from(events)))
}
