/// Murmur server binary
use murmur::{config::ServerConfig, context::AppContext, jobs::JobScheduler, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "murmur={level},tower_http={level}",
            level = config.logging.level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Murmur v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::new(config).await?;

    let scheduler = Arc::new(JobScheduler::new(Arc::new(ctx.clone())));
    scheduler.start();

    server::serve(ctx).await?;

    Ok(())
}
