// Tracing setup. The filter sits behind a reload layer so the level from the
// loaded configuration can replace the startup default.
use std::sync::OnceLock;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Dependencies that log every connection or SMTP exchange at info.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "lettre=warn", "reqwest=warn"];

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let base_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switch to the configured level. `RUST_LOG`, when set, keeps precedence.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get()
        && let Err(e) = handle.reload(filter_for(level))
    {
        tracing::warn!(error = %e, level, "Could not apply logging level");
    }
}

fn filter_for(level: &str) -> EnvFilter {
    QUIET_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::new(level), EnvFilter::add_directive)
}
