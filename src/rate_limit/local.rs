/// In-process rate limiter
use super::{limit_for, Allowance};
use crate::{
    error::{ApiError, ApiResult},
    models::{Application, Tenant},
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, time::Duration};

type KeyedLimiter =
    GovernorLimiter<Tenant, DefaultKeyedStateStore<Tenant>, DefaultClock, StateInformationMiddleware>;

/// Keyed GCRA limiter, one bucket per application
pub struct LocalLimiter {
    staging: KeyedLimiter,
    production: KeyedLimiter,
    staging_limit: u32,
    production_limit: u32,
    window: Duration,
    clock: DefaultClock,
}

fn keyed(limit: u32, window: Duration) -> KeyedLimiter {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let period = window / burst.get();
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);
    GovernorLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>()
}

impl LocalLimiter {
    pub fn new(staging_limit: u32, production_limit: u32, window: Duration) -> Self {
        Self {
            staging: keyed(staging_limit, window),
            production: keyed(production_limit, window),
            staging_limit: staging_limit.max(1),
            production_limit: production_limit.max(1),
            window,
            clock: DefaultClock::default(),
        }
    }

    pub fn check(&self, application: &Application) -> ApiResult<Allowance> {
        let limiter = if application.in_production {
            &self.production
        } else {
            &self.staging
        };
        let limit = limit_for(application, self.staging_limit, self.production_limit) as u64;

        match limiter.check_key(&application.tenant()) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity() as u64;
                let used = limit.saturating_sub(remaining);
                let reset = self.window.as_secs_f64() * used as f64 / limit as f64;
                Ok(Allowance {
                    limit,
                    remaining,
                    reset_secs: reset.ceil() as u64,
                })
            }
            Err(not_until) => Err(ApiError::RateLimitExceeded {
                limit,
                retry_after: not_until.wait_time_from(self.clock.now()),
            }),
        }
    }
}
