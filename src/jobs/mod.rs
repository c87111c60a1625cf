/// Background jobs
use crate::{context::AppContext, metrics};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Storage health check period
const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(300);

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));
    }

    /// Ping the storage driver (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(HEALTH_CHECK_PERIOD);

        loop {
            interval.tick().await;

            match scheduler.context.store.ping().await {
                Ok(()) => {
                    debug!("health_check_job: storage reachable");
                    metrics::record_background_job("health_check", "success");
                }
                Err(e) => {
                    error!("health_check_job: storage unreachable: {}", e);
                    metrics::record_background_job("health_check", "failure");
                }
            }
        }
    }
}
