/// Request metrics and rate limiting middleware
use crate::{auth::basic_credentials, context::AppContext, metrics};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

/// Count and time every request by matched route
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::HTTP_REQUESTS_ACTIVE.inc();
    let response = next.run(req).await;
    metrics::HTTP_REQUESTS_ACTIVE.dec();

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Charge the request to its application's budget.
///
/// Requests without a resolvable application token pass through
/// uncounted; the endpoint's own extractor rejects them if needed. The
/// resolved application is stored in the request extensions so the
/// extractor does not look it up again.
pub async fn rate_limit(State(ctx): State<AppContext>, mut req: Request, next: Next) -> Response {
    let Ok(credentials) = basic_credentials(req.headers()) else {
        return next.run(req).await;
    };
    let Ok(application) = ctx
        .account_manager
        .application_by_token(&credentials.token)
        .await
    else {
        return next.run(req).await;
    };

    match ctx.rate_limiter.check(&application).await {
        Ok(allowance) => {
            req.extensions_mut().insert(application);
            let mut response = next.run(req).await;
            if let Some(allowance) = allowance {
                allowance.apply(response.headers_mut());
            }
            response
        }
        Err(e) => e.into_response(),
    }
}
