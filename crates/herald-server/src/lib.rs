pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod server;

pub use config::{
    AppConfig, BackendsConfig, CacheBackend, CacheConfig, ChannelsConfig, DispatcherConfig,
    LoggingConfig, QueueBackend, SchedulerConfig, ServerConfig, StoreBackend,
};
pub use error::ServerError;
pub use http::{ApiError, AppState, router};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{HeraldServer, ServerBuilder, build_app, build_channels};
