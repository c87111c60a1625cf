/// Per-application request budgets
///
/// Each application gets `limit` requests per window. The limit depends on
/// whether the application is in production. Two backends are available:
/// an in-process keyed GCRA limiter and a fixed-window counter in Redis that
/// is shared by every instance.
mod local;
mod shared;

pub use local::LocalLimiter;
pub use shared::SharedLimiter;

use crate::{
    config::{RateLimitBackend, RateLimitConfig},
    error::{ApiError, ApiResult},
    metrics,
    models::Application,
};
use axum::http::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::{info, warn};

/// Budget left after an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the budget is whole again
    pub reset_secs: u64,
}

impl Allowance {
    /// Write the `X-RateLimit-*` headers
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(self.remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(self.reset_secs));
    }
}

/// Rate limiter selected by configuration
pub enum RateLimiter {
    Disabled,
    Local(LocalLimiter),
    Shared(SharedLimiter),
}

impl RateLimiter {
    /// Build the configured backend
    pub async fn from_config(config: &RateLimitConfig) -> ApiResult<Self> {
        if !config.enabled {
            info!("Rate limiting disabled");
            return Ok(RateLimiter::Disabled);
        }

        let window = Duration::from_secs(config.window_secs.max(1));
        match config.backend {
            RateLimitBackend::Local => {
                info!(
                    staging = config.staging_limit,
                    production = config.production_limit,
                    "Using in-process rate limiter"
                );
                Ok(RateLimiter::Local(LocalLimiter::new(
                    config.staging_limit,
                    config.production_limit,
                    window,
                )))
            }
            RateLimitBackend::Redis => {
                info!("Using Redis rate limiter at {}", config.redis_url);
                Ok(RateLimiter::Shared(
                    SharedLimiter::connect(
                        &config.redis_url,
                        config.staging_limit,
                        config.production_limit,
                        window,
                    )
                    .await?,
                ))
            }
        }
    }

    /// Count one request against `application`. `Ok(None)` when disabled.
    pub async fn check(&self, application: &Application) -> ApiResult<Option<Allowance>> {
        let outcome = match self {
            RateLimiter::Disabled => return Ok(None),
            RateLimiter::Local(limiter) => limiter.check(application),
            RateLimiter::Shared(limiter) => limiter.check(application).await,
        };

        match outcome {
            Ok(allowance) => Ok(Some(allowance)),
            Err(e @ ApiError::RateLimitExceeded { .. }) => {
                warn!(
                    account_id = application.account_id,
                    application_id = application.id,
                    "rate_limit: budget exhausted"
                );
                metrics::record_rate_limit_rejection(application.in_production);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Requests per window for `application`
fn limit_for(application: &Application, staging: u32, production: u32) -> u32 {
    if application.in_production {
        production
    } else {
        staging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_headers_written() {
        let mut headers = HeaderMap::new();
        Allowance {
            limit: 100,
            remaining: 42,
            reset_secs: 17,
        }
        .apply(&mut headers);
        assert_eq!(headers["X-RateLimit-Limit"], "100");
        assert_eq!(headers["X-RateLimit-Remaining"], "42");
        assert_eq!(headers["X-RateLimit-Reset"], "17");
    }

    #[tokio::test]
    async fn test_disabled_admits_everything() {
        let config = RateLimitConfig {
            enabled: false,
            backend: RateLimitBackend::Local,
            redis_url: String::new(),
            window_secs: 60,
            staging_limit: 1,
            production_limit: 1,
        };
        let limiter = RateLimiter::from_config(&config).await.unwrap();
        let application = local::tests::application(false);
        for _ in 0..5 {
            assert_eq!(limiter.check(&application).await.unwrap(), None);
        }
    }
}
