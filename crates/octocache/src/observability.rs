// Tracing initialization with a configurable and reloadable log level.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Install the global subscriber from the `logging` config section.
pub fn init_tracing_from_config(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

pub fn init_tracing_with_level(level: &str) {
    // Prefer RUST_LOG from env, otherwise use provided level string.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Apply a new logging level at runtime if the reload handle is configured.
///
/// Returns `false` when tracing was not initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(level);
            })
            .is_ok(),
        None => false,
    }
}
