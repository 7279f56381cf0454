use std::net::SocketAddr;
use std::time::Duration;

use herald_core::{EmailConfig, RetryPolicy, TelegramConfig, WebhookConfig};
use herald_postgres::PostgresConfig;
use herald_redis::RedisConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Which store and queue implementations to run
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Backoff for (re)connecting to Postgres and Redis
    #[serde(default = "default_reconnect")]
    pub reconnect: RetryPolicy,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: BackendsConfig::default(),
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            reconnect: default_reconnect(),
            channels: ChannelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("server.host '{}' is not an IP address", self.server.host));
        }

        // Backends
        if self.backends.store == StoreBackend::Postgres {
            self.postgres.validate().map_err(|e| e.to_string())?;
        }
        if self.backends.queue == QueueBackend::Redis || self.cache.backend == CacheBackend::Redis
        {
            self.redis.validate().map_err(|e| e.to_string())?;
        }
        self.reconnect
            .validate()
            .map_err(|e| format!("reconnect: {e}"))?;

        // Cache
        if self.cache.backend != CacheBackend::Disabled && self.cache.ttl.is_zero() {
            return Err("cache.ttl must be > 0".into());
        }
        if self.cache.warm_limit < 0 {
            return Err("cache.warm_limit must be >= 0".into());
        }
        if self.cache.backend == CacheBackend::Local && self.cache.cleanup_interval.is_zero() {
            return Err("cache.cleanup_interval must be > 0".into());
        }

        // Scheduler and dispatcher
        if self.scheduler.interval.is_zero() {
            return Err("scheduler.interval must be > 0".into());
        }
        if self.scheduler.batch_size <= 0 {
            return Err("scheduler.batch_size must be > 0".into());
        }
        if self.dispatcher.concurrency == 0 {
            return Err("dispatcher.concurrency must be > 0".into());
        }
        if self.dispatcher.receive_timeout.is_zero() {
            return Err("dispatcher.receive_timeout must be > 0".into());
        }
        if self.dispatcher.send_timeout.is_zero() {
            return Err("dispatcher.send_timeout must be > 0".into());
        }
        self.dispatcher
            .retry
            .validate()
            .map_err(|e| format!("dispatcher.retry: {e}"))?;

        // Channels
        if let Some(ref email) = self.channels.email
            && (email.smtp_host.is_empty() || email.from.is_empty())
        {
            return Err("channels.email requires smtp_host and from".into());
        }
        if let Some(ref telegram) = self.channels.telegram
            && telegram.bot_token.is_empty()
        {
            return Err("channels.telegram requires bot_token".into());
        }
        if let Some(ref webhook) = self.channels.webhook
            && webhook.url.is_empty()
        {
            return Err("channels.webhook requires url".into());
        }
        if self.channels.telegram.as_ref().is_some_and(|t| t.request_timeout.is_zero())
            || self.channels.webhook.as_ref().is_some_and(|w| w.request_timeout.is_zero())
        {
            return Err("channels request_timeout must be > 0".into());
        }

        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Local,
    Redis,
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default)]
    pub queue: QueueBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// Warm the cache with rows created this recently; zero disables warm-up
    #[serde(default = "default_warm_window", with = "humantime_serde")]
    pub warm_window: Duration,
    #[serde(default = "default_warm_limit")]
    pub warm_limit: i64,
    /// How often the local cache drops expired entries
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}
fn default_warm_window() -> Duration {
    Duration::from_secs(3600)
}
fn default_warm_limit() -> i64 {
    1000
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl: default_cache_ttl(),
            warm_window: default_warm_window(),
            warm_limit: default_warm_limit(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_scheduler_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_batch_size() -> i64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_scheduler_interval(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_receive_timeout", with = "humantime_serde")]
    pub receive_timeout: Duration,
    #[serde(default = "default_requeue_delay", with = "humantime_serde")]
    pub requeue_delay: Duration,
    /// Upper bound on one send attempt
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
    /// Per-channel send retries
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_concurrency() -> usize {
    8
}
fn default_receive_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_requeue_delay() -> Duration {
    Duration::from_millis(200)
}
fn default_send_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            receive_timeout: default_receive_timeout(),
            requeue_delay: default_requeue_delay(),
            send_timeout: default_send_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_reconnect() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(500), 2.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Reject notifications naming a channel that has no configured sender
    #[serde(default = "default_true")]
    pub reject_unknown: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            email: None,
            telegram: None,
            webhook: None,
            reject_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "herald.toml";

    /// Load `path` (or `herald.toml` if none is given) when it exists, then
    /// apply `HERALD__SECTION__KEY` environment overrides and validate.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., HERALD__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("HERALD")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
