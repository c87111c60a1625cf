/// API routes and handlers
pub mod accounts;
pub mod connections;
pub mod events;
pub mod feed;
pub mod middleware;
pub mod response;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(accounts::routes())
        .merge(users::routes())
        .merge(connections::routes())
        .merge(events::routes())
        .merge(feed::routes())
}
