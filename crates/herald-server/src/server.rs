use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use herald_core::memory::{InMemoryQueue, InMemoryStore, LocalCache};
use herald_core::{
    ChannelRegistry, DefaultNotificationService, Dispatcher, EmailAdapter, NoopCache,
    NotificationCache, NotificationQueue, NotificationRepository, NotificationStore, Scheduler,
    TelegramAdapter, WebhookAdapter,
};
use herald_postgres::PostgresNotificationStore;
use herald_redis::{RedisCache, RedisQueue};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, CacheBackend, QueueBackend, StoreBackend};
use crate::error::ServerError;
use crate::http::{AppState, router};

/// Backends, channels and the HTTP router, wired but not yet running.
pub struct HeraldServer {
    addr: SocketAddr,
    app: Router,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    local_cache: Option<(Arc<LocalCache>, Duration)>,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Connect the configured backends and assemble the components.
    pub async fn build(self) -> Result<HeraldServer, ServerError> {
        let cfg = self.config;
        cfg.validate().map_err(ServerError::Config)?;

        let redis_pool = if cfg.backends.queue == QueueBackend::Redis
            || cfg.cache.backend == CacheBackend::Redis
        {
            tracing::info!(url = %cfg.redis.url, "Connecting to Redis");
            Some(herald_redis::create_pool(&cfg.redis, &cfg.reconnect).await?)
        } else {
            None
        };

        let store: Arc<dyn NotificationStore> = match cfg.backends.store {
            StoreBackend::Postgres => Arc::new(
                PostgresNotificationStore::connect(&cfg.postgres, &cfg.reconnect).await?,
            ),
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; notifications are lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        let mut local_cache = None;
        let cache: Arc<dyn NotificationCache> = match (cfg.cache.backend, &redis_pool) {
            (CacheBackend::Redis, Some(pool)) => Arc::new(RedisCache::new(pool.clone())),
            (CacheBackend::Local, _) => {
                let local = Arc::new(LocalCache::new());
                local_cache = Some((local.clone(), cfg.cache.cleanup_interval));
                local
            }
            _ => Arc::new(NoopCache),
        };

        let queue: Arc<dyn NotificationQueue> = match (cfg.backends.queue, &redis_pool) {
            (QueueBackend::Redis, Some(pool)) => {
                let queue = RedisQueue::new(pool.clone(), cfg.redis.queue_key.clone());
                queue.recover().await?;
                Arc::new(queue)
            }
            _ => Arc::new(InMemoryQueue::new()),
        };

        let repo = Arc::new(NotificationRepository::new(store, cache, cfg.cache.ttl));
        if cfg.cache.backend != CacheBackend::Disabled
            && !cfg.cache.warm_window.is_zero()
            && let Err(e) = repo.warm(cfg.cache.warm_window, cfg.cache.warm_limit).await
        {
            tracing::warn!(error = %e, "Cache warm-up failed");
        }

        let channels = build_channels(&cfg)?;
        tracing::info!(channels = ?channels.channels(), "Channel senders configured");

        let mut service = DefaultNotificationService::new(repo.clone());
        if cfg.channels.reject_unknown {
            service = service.with_known_channels(channels.channels());
        }

        let scheduler = Scheduler::new(repo.clone(), queue.clone())
            .with_interval(cfg.scheduler.interval)
            .with_batch_size(cfg.scheduler.batch_size);

        let dispatcher = Dispatcher::new(repo, queue, channels)
            .with_retry(cfg.dispatcher.retry)
            .with_reconnect(cfg.reconnect)
            .with_concurrency(cfg.dispatcher.concurrency)
            .with_receive_timeout(cfg.dispatcher.receive_timeout)
            .with_requeue_delay(cfg.dispatcher.requeue_delay)
            .with_send_timeout(cfg.dispatcher.send_timeout);

        let app = build_app(
            AppState {
                service: Arc::new(service),
            },
            &cfg,
        );

        Ok(HeraldServer {
            addr: cfg.addr(),
            app,
            scheduler,
            dispatcher,
            local_cache,
        })
    }
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    router(state, cfg.server.body_limit_bytes)
}

/// Register a sender for every channel section present in the config.
pub fn build_channels(cfg: &AppConfig) -> Result<ChannelRegistry, ServerError> {
    let mut registry = ChannelRegistry::new();
    if let Some(ref email) = cfg.channels.email {
        registry.register(Arc::new(EmailAdapter::new(email.clone())?));
    }
    if let Some(ref telegram) = cfg.channels.telegram {
        registry.register(Arc::new(TelegramAdapter::new(telegram.clone())?));
    }
    if let Some(ref webhook) = cfg.channels.webhook {
        registry.register(Arc::new(WebhookAdapter::new(webhook.clone())?));
    }
    if registry.is_empty() {
        tracing::warn!("No channel senders configured; every delivery will fail");
    }
    Ok(registry)
}

impl HeraldServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve HTTP and run the workers until Ctrl+C or SIGTERM, then drain.
    pub async fn run(self) -> Result<(), ServerError> {
        // Workers start only once the address is ours.
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(self.scheduler.run(shutdown_rx.clone())),
            tokio::spawn(self.dispatcher.run(shutdown_rx.clone())),
        ];
        if let Some((cache, period)) = self.local_cache {
            workers.push(tokio::spawn(cache.run_cleanup(period, shutdown_rx)));
        }

        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if shutdown_tx.send(true).is_err() {
            tracing::debug!("Workers already exited");
        }
        for worker in workers {
            worker.await?;
        }
        tracing::info!("Workers stopped");

        served.map_err(ServerError::from)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
