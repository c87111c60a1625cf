/// Redis-backed fixed window limiter
///
/// The first request of a window seeds the counter with the limit and an
/// expiry (`SET NX EX`); every request then decrements it. A negative
/// counter means the window is spent.
use super::{limit_for, Allowance};
use crate::{
    error::{ApiError, ApiResult},
    models::Application,
    store::StoreError,
};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct SharedLimiter {
    connection: ConnectionManager,
    staging_limit: u32,
    production_limit: u32,
    window: Duration,
}

impl SharedLimiter {
    pub async fn connect(
        url: &str,
        staging_limit: u32,
        production_limit: u32,
        window: Duration,
    ) -> ApiResult<Self> {
        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client for rate limiting: {}", e);
            ApiError::Storage(StoreError::Redis(e))
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ApiError::Storage(StoreError::Redis(e)))?;
        info!("Redis rate limiter connected");

        Ok(Self {
            connection,
            staging_limit,
            production_limit,
            window,
        })
    }

    fn key(application: &Application) -> String {
        format!("ratelimit:{}:{}", application.account_id, application.id)
    }

    pub async fn check(&self, application: &Application) -> ApiResult<Allowance> {
        let limit = limit_for(application, self.staging_limit, self.production_limit) as i64;
        let key = Self::key(application);
        let mut conn = self.connection.clone();

        let (remaining, ttl): (i64, i64) = redis::pipe()
            .cmd("SET")
            .arg(&key)
            .arg(limit)
            .arg("NX")
            .arg("EX")
            .arg(self.window.as_secs())
            .ignore()
            .cmd("DECR")
            .arg(&key)
            .cmd("TTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ApiError::Storage(StoreError::Redis(e)))?;

        let reset_secs = if ttl > 0 { ttl as u64 } else { self.window.as_secs() };
        debug!(key = %key, remaining, "rate_limit: window counter decremented");

        if remaining < 0 {
            return Err(ApiError::RateLimitExceeded {
                limit: limit as u64,
                retry_after: Duration::from_secs(reset_secs),
            });
        }

        Ok(Allowance {
            limit: limit as u64,
            remaining: remaining as u64,
            reset_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_per_application() {
        let mut application = super::super::local::tests::application(false);
        assert_eq!(SharedLimiter::key(&application), "ratelimit:3:7");
        application.id = 9;
        assert_eq!(SharedLimiter::key(&application), "ratelimit:3:9");
    }
}
