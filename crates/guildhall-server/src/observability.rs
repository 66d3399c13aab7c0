//! Tracing setup.
//!
//! The filter sits behind a reload layer: the process starts at `info` and
//! switches to `logging.level` once the config file is read. An explicit
//! `RUST_LOG` always wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const BOOTSTRAP_LEVEL: &str = "info";

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_from_env() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_tracing() {
    let filter = filter_from_env().unwrap_or_else(|| EnvFilter::new(BOOTSTRAP_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER.set(handle);
    }
}

/// Swap in the configured level. False when `RUST_LOG` governs, tracing was
/// never initialized or the directive does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    if filter_from_env().is_some() {
        return false;
    }
    let Some(handle) = FILTER.get() else {
        return false;
    };
    match EnvFilter::try_new(level) {
        Ok(filter) => handle.reload(filter).is_ok(),
        Err(e) => {
            tracing::warn!(level = %level, error = %e, "ignoring unparsable log level");
            false
        }
    }
}
