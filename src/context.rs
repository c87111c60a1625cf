/// Application context and dependency injection
use crate::{
    account::AccountManager,
    config::{ServerConfig, StorageBackend},
    db,
    error::{ApiError, ApiResult},
    events::EventEngine,
    feed::FeedEngine,
    graph::{ConnectionEngine, GraphIndex},
    rate_limit::RateLimiter,
    session::{PasswordService, SessionManager},
    store::{MemoryStore, RedisStore, SqliteStore, Store},
    users::{UserDirectory, UserManager},
};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub sessions: Arc<SessionManager>,
    pub account_manager: Arc<AccountManager>,
    pub directory: Arc<UserDirectory>,
    pub graph: Arc<GraphIndex>,
    pub events: Arc<EventEngine>,
    pub connections: Arc<ConnectionEngine>,
    pub users: Arc<UserManager>,
    pub feed: Arc<FeedEngine>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        config
            .validate()
            .map_err(|e| ApiError::Internal(format!("Invalid configuration: {}", e)))?;

        let store = Self::open_store(&config).await?;
        Self::with_store(config, store, Arc::new(DefaultClock)).await
    }

    /// Open the configured storage driver
    async fn open_store(config: &ServerConfig) -> ApiResult<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match &config.storage.backend {
            StorageBackend::Sqlite {
                path,
                max_connections,
            } => {
                info!("Opening SQLite store at {:?}", path);
                let options = db::DatabaseOptions {
                    max_connections: *max_connections,
                    ..Default::default()
                };
                Arc::new(SqliteStore::open(path, options).await?)
            }
            StorageBackend::Redis { url, key_prefix } => Arc::new(
                RedisStore::connect(url, key_prefix, config.fanout.scan_batch).await?,
            ),
            StorageBackend::Memory => {
                info!("Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        store.ping().await?;
        Ok(store)
    }

    /// Wire every service on top of an already opened store
    pub async fn with_store(
        config: ServerConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        let passwords = PasswordService::new(
            config.session.password_memory_kib,
            config.session.password_iterations,
        )?;
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            clock.clone(),
            config.session.token_bytes,
        ));

        let account_manager = Arc::new(AccountManager::new(
            store.clone(),
            sessions.clone(),
            passwords.clone(),
            clock.clone(),
        ));

        let directory = Arc::new(UserDirectory::new(store.clone()));
        let graph = Arc::new(GraphIndex::new(store.clone()));
        let events = Arc::new(EventEngine::new(
            store.clone(),
            graph.clone(),
            directory.clone(),
            clock.clone(),
            config.fanout.clone(),
        ));
        let connections = Arc::new(ConnectionEngine::new(
            store.clone(),
            graph.clone(),
            directory.clone(),
            events.clone(),
            clock.clone(),
        ));
        let users = Arc::new(UserManager::new(
            store.clone(),
            directory.clone(),
            graph.clone(),
            connections.clone(),
            sessions.clone(),
            passwords,
            clock.clone(),
        ));
        let feed = Arc::new(FeedEngine::new(store.clone(), events.clone(), directory.clone()));

        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit).await?);

        info!(driver = store.driver(), "Application context ready");

        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            sessions,
            account_manager,
            directory,
            graph,
            events,
            connections,
            users,
            feed,
            rate_limiter,
        })
    }

    /// Get service address
    pub fn listen_address(&self) -> String {
        format!(
            "{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
