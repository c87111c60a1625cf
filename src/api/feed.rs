/// Feed endpoints
use crate::{
    api::response::{list, ok},
    auth::UserAuth,
    context::AppContext,
    error::ApiResult,
};
use axum::{extract::State, response::Response, routing::get, Router};

/// Build feed routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/user/feed", get(feed))
        .route("/user/feed/unread", get(unread_feed))
        .route("/user/feed/unread/count", get(unread_count))
}

/// Whole feed; advances the read cursor
async fn feed(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let page = ctx.feed.user_feed(auth.tenant(), auth.user_id()).await?;
    Ok(list(page.is_empty(), page))
}

/// Events newer than the cursor; advances it
async fn unread_feed(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let page = ctx.feed.unread_feed(auth.tenant(), auth.user_id()).await?;
    Ok(list(page.is_empty(), page))
}

async fn unread_count(State(ctx): State<AppContext>, auth: UserAuth) -> ApiResult<Response> {
    let count = ctx.feed.unread_count(auth.tenant(), auth.user_id()).await?;
    Ok(ok(count))
}
